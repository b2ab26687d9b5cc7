use anyhow::{Context, Result};
use lettre::message::header::{ContentType, Header, HeaderName, HeaderValue};
use lettre::message::{Attachment, Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

use crate::config::SmtpConfig;

pub struct InlineImage {
    pub cid: String,
    pub png: Vec<u8>,
}

#[derive(Debug, Clone)]
struct ListUnsubscribe(String);

impl ListUnsubscribe {
    fn mailto(address: &str) -> Self {
        Self(format!("<mailto:{}?subject=Unsubscribe>", address))
    }
}

impl Header for ListUnsubscribe {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("List-Unsubscribe")
    }

    fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self(s.to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

pub struct Mailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
}

impl Mailer {
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.server)
            .with_context(|| format!("invalid SMTP relay {}", config.server))?
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build();
        let sender: Mailbox = format!("Financial Digest <{}>", config.sender)
            .parse()
            .with_context(|| format!("invalid sender address {}", config.sender))?;
        Ok(Self { transport, sender })
    }

    pub async fn send_digest(
        &self,
        recipient: &str,
        subject: &str,
        html: String,
        plain: String,
        images: Vec<InlineImage>,
    ) -> Result<()> {
        let to: Mailbox = recipient
            .parse()
            .with_context(|| format!("invalid recipient address {}", recipient))?;

        let mut body = MultiPart::related().multipart(MultiPart::alternative_plain_html(plain, html));
        for image in images {
            body = body.singlepart(
                Attachment::new_inline(image.cid)
                    .body(image.png, ContentType::parse("image/png")?),
            );
        }

        let message = Message::builder()
            .from(self.sender.clone())
            .reply_to(self.sender.clone())
            .to(to)
            .subject(subject)
            .header(ListUnsubscribe::mailto(&self.sender.email.to_string()))
            .multipart(body)
            .context("failed to assemble digest message")?;

        self.transport
            .send(message)
            .await
            .context("SMTP send failed")?;
        info!("digest sent to {}", recipient);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsubscribe_header_wraps_a_mailto() {
        let header = ListUnsubscribe::mailto("digest@example.com");
        assert_eq!(header.0, "<mailto:digest@example.com?subject=Unsubscribe>");
    }
}
