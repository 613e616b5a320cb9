use mime_guess::from_path;
use rust_embed::RustEmbed;
use spin_sdk::http::Response;

use crate::core::errors::ApiError;

#[derive(RustEmbed)]
#[folder = "static"]
pub struct Assets;

/// Raw bytes of an embedded asset.
pub fn asset(name: &str) -> Option<Vec<u8>> {
    Assets::get(name).map(|file| file.data.into_owned())
}

pub fn serve_static(path: &str) -> Result<Response, ApiError> {
    let file_path = match path {
        "" | "/" | "/index.html" => "index.html",
        _ => path.trim_start_matches('/'),
    };

    let data = asset(file_path).ok_or_else(|| ApiError::not_found("File not found."))?;
    let mime = from_path(file_path).first_or_octet_stream();

    Ok(Response::builder()
        .status(200)
        .header("Content-Type", mime.as_ref())
        .body(data)
        .build())
}
