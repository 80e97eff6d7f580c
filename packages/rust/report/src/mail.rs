//! Report delivery over an unauthenticated SMTP relay.

use kbot_shared::{KbotError, Result};
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{info, instrument};

use crate::compose::Report;

fn mailbox(address: &str) -> Result<Mailbox> {
    address
        .parse()
        .map_err(|e| KbotError::Mail(format!("invalid address {address:?}: {e}")))
}

/// Build the plain-text message for a report.
pub fn build_message(report: &Report) -> Result<Message> {
    Message::builder()
        .from(mailbox(&report.from)?)
        .to(mailbox(&report.to)?)
        .cc(mailbox(&report.cc)?)
        .subject(report.subject.as_str())
        .header(ContentType::TEXT_PLAIN)
        .body(report.body.clone())
        .map_err(|e| KbotError::Mail(format!("failed to build message: {e}")))
}

/// Split `host[:port]` into its parts.
pub fn parse_relay(relay: &str) -> Result<(&str, Option<u16>)> {
    match relay.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            let port = port
                .parse()
                .map_err(|e| KbotError::validation(format!("bad SMTP port in {relay:?}: {e}")))?;
            Ok((host, Some(port)))
        }
        Some(_) => Err(KbotError::validation(format!("SMTP relay {relay:?} has no host"))),
        None if relay.is_empty() => Err(KbotError::validation("SMTP relay is empty")),
        None => Ok((relay, None)),
    }
}

/// Send `message` through `relay` (`host` or `host:port`, port 25 by default).
#[instrument(skip(message))]
pub async fn send(message: Message, relay: &str) -> Result<()> {
    let (host, port) = parse_relay(relay)?;

    let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host);
    if let Some(port) = port {
        builder = builder.port(port);
    }
    let transport = builder.build();

    let response = transport
        .send(message)
        .await
        .map_err(|e| KbotError::Mail(format!("SMTP delivery via {relay} failed: {e}")))?;
    info!(code = %response.code(), "report sent");
    Ok(())
}
