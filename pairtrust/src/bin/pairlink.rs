// pairlink: two-party demo of the PairLink handshake.
//
// Run it twice. The first instance, told it is the server, listens on the
// configured address; the second finds it and connects. They then exchange
// public keys and run the four steps:
//
//   STEP 1  session key transport
//   STEP 2  confidential message (30 bytes)
//   STEP 3  integrity round (40 bytes)
//   STEP 4  authenticated round (50 bytes)

use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use pairtrust::crypto::symmetric::random_message;
use pairtrust::logging::{init_tracing, json_requested, DEFAULT_FILTER};
use pairtrust::{ReceivedRound, Role, Session, SessionConfig};

const CONFIDENTIAL_LEN: usize = 30;
const INTEGRITY_LEN: usize = 40;
const AUTHENTICATED_LEN: usize = 50;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing(DEFAULT_FILTER, json_requested());

    let config = SessionConfig::from_env().context("loading configuration")?;
    tracing::info!(addr = %config.address, rsa_bits = config.rsa_bits, "pairlink starting");

    let mut session = Session::new(config)?;
    let result = run(&mut session).await;
    tracing::info!("CLOSING");
    session.close().await;
    result
}

async fn run(session: &mut Session) -> Result<()> {
    let role = loop {
        let mut prompt_failure = None;
        let elected = session
            .negotiate_role(|| {
                let answer = tokio::task::block_in_place(|| {
                    ask_to_serve(&mut io::stdin().lock(), &mut io::stdout())
                });
                answer.unwrap_or_else(|e| {
                    prompt_failure = Some(e);
                    false
                })
            })
            .await
            .context("negotiating role")?;
        if let Some(e) = prompt_failure {
            return Err(e).context("stdin closed before a role was chosen");
        }
        if let Some(role) = elected {
            break role;
        }
    };
    tracing::info!(%role, "role decided");

    session
        .exchange_public_keys()
        .await
        .context("exchanging public keys")?;

    tracing::info!("STEP 1: session key");
    session
        .establish_session_key()
        .await
        .context("establishing session key")?;

    tracing::info!("STEP 2: confidential message");
    match role {
        Role::Initiator => {
            let message = random_message(CONFIDENTIAL_LEN);
            tracing::info!(message = %hex::encode(&message), "sending");
            session.send_confidential(&message).await?;
        }
        Role::Responder => {
            let message = session.receive_confidential().await?;
            tracing::info!(message = %hex::encode(&message), "decrypted");
        }
    }

    tracing::info!("STEP 3: integrity round");
    match role {
        Role::Initiator => {
            let round = session.prepare_integrity_round(&random_message(INTEGRITY_LEN))?;
            tracing::info!(
                message = %hex::encode(&round.message),
                digest = %hex::encode(&round.digest),
                "sending"
            );
            session.send_integrity_round(&round).await?;
        }
        Role::Responder => {
            let received = session.receive_integrity_round().await?;
            report(&received)?;
        }
    }

    tracing::info!("STEP 4: authenticated round");
    match role {
        Role::Initiator => {
            let round = session.prepare_authenticated_round(&random_message(AUTHENTICATED_LEN))?;
            tracing::info!(
                message = %hex::encode(&round.message),
                digest = %hex::encode(&round.digest),
                signature = %hex::encode(&round.signature),
                "sending"
            );
            session.send_authenticated_round(&round).await?;
        }
        Role::Responder => {
            let received = session.receive_authenticated_round().await?;
            report(&received)?;
        }
    }

    Ok(())
}

/// Ask whether this instance should listen. Any answer starting with `y`
/// (either case) is a yes. End of input is an error.
fn ask_to_serve<R, W>(input: &mut R, output: &mut W) -> io::Result<bool>
where
    R: BufRead,
    W: Write,
{
    write!(output, "Server is not open. Are you the server (y/n)? ")?;
    output.flush()?;
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "end of input"));
    }
    Ok(line.trim().to_ascii_lowercase().starts_with('y'))
}

fn report(received: &ReceivedRound) -> Result<()> {
    tracing::info!(
        message = %hex::encode(&received.message),
        received = %hex::encode(&received.received_digest),
        computed = %hex::encode(received.computed_digest),
        "digests"
    );
    let verdict = if received.outcome.intact {
        "NOT MODIFIED"
    } else {
        "MODIFIED"
    };
    tracing::info!("message {verdict}");
    if let Some(valid) = received.outcome.signature_valid {
        tracing::info!("signature {}", if valid { "VALID" } else { "NOT VALID" });
    }
    tracing::info!(outcome = %serde_json::to_string(&received.outcome)?, "round complete");
    Ok(())
}
