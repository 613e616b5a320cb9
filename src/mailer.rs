use tracing::{debug, info};

/// Outbound email. Delivery failures are reported to the caller and never touch stored state.
pub trait Mailer {
    /// False when this host has no way to deliver mail. Password resets are refused then.
    fn available(&self) -> bool {
        true
    }

    fn send_password_reset(&self, to: &str, username: &str, link: &str) -> anyhow::Result<()>;
}

/// Development mailer. The link itself only shows up at `debug` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send_password_reset(&self, to: &str, username: &str, link: &str) -> anyhow::Result<()> {
        info!(%to, %username, "password reset requested (SMTP not configured)");
        debug!(%link, "password reset link");
        Ok(())
    }
}

/// Mailer for hosts without outbound mail.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledMailer;

impl Mailer for DisabledMailer {
    fn available(&self) -> bool {
        false
    }

    fn send_password_reset(&self, _to: &str, _username: &str, _link: &str) -> anyhow::Result<()> {
        anyhow::bail!("no mail transport is configured on this host")
    }
}

fn reset_body(username: &str, link: &str) -> String {
    format!(
        "Hi {username},\n\n\
        Someone asked to reset the password for your account.\n\
        Open this link to choose a new password:\n{link}\n\n\
        This link will expire in 1 hour.\n\
        If you did not request this, you can ignore this email."
    )
}

#[cfg(not(target_arch = "wasm32"))]
pub use smtp::SmtpMailer;

#[cfg(not(target_arch = "wasm32"))]
mod smtp {
    use anyhow::Context as _;
    use lettre::message::{header::ContentType, Mailbox};
    use lettre::transport::smtp::authentication::Credentials;
    use lettre::{Message, SmtpTransport, Transport};
    use tracing::info;

    use super::{reset_body, Mailer};
    use crate::config::SmtpConfig;

    pub struct SmtpMailer {
        transport: SmtpTransport,
        from: Mailbox,
    }

    impl SmtpMailer {
        pub fn new(config: &SmtpConfig) -> anyhow::Result<Self> {
            let from = config
                .from
                .parse::<Mailbox>()
                .with_context(|| format!("invalid EMAIL_FROM address {:?}", config.from))?;

            let transport = SmtpTransport::starttls_relay(&config.host)
                .with_context(|| format!("failed to configure SMTP relay {}", config.host))?
                .port(config.port)
                .credentials(Credentials::new(
                    config.username.clone(),
                    config.password.clone(),
                ))
                .build();

            Ok(Self { transport, from })
        }
    }

    impl Mailer for SmtpMailer {
        fn send_password_reset(&self, to: &str, username: &str, link: &str) -> anyhow::Result<()> {
            let recipient = to
                .parse::<Mailbox>()
                .with_context(|| format!("invalid recipient address {to:?}"))?;

            let message = Message::builder()
                .from(self.from.clone())
                .to(recipient)
                .subject("Password reset")
                .header(ContentType::TEXT_PLAIN)
                .body(reset_body(username, link))
                .context("failed to build reset email")?;

            self.transport
                .send(&message)
                .context("failed to send reset email")?;
            info!(%to, "password reset email sent");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_contains_link_and_expiry() {
        let body = reset_body("alice", "http://localhost:3000/reset-password?token=abc");
        assert!(body.starts_with("Hi alice,"));
        assert!(body.contains("token=abc"));
        assert!(body.contains("1 hour"));
    }

    #[test]
    fn disabled_mailer_refuses_to_send() {
        assert!(!DisabledMailer.available());
        assert!(DisabledMailer
            .send_password_reset("a@example.com", "alice", "http://x")
            .is_err());
    }

    #[test]
    fn log_mailer_always_succeeds() {
        assert!(LogMailer.available());
        assert!(LogMailer
            .send_password_reset("a@example.com", "alice", "http://x")
            .is_ok());
    }
}
