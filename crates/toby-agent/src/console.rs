//! Operator console: AT commands typed on stdin go through the same
//! correlator as the lifecycle and the outcome is printed back.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use toby_modem::Correlator;

/// Serve commands from `input` until it closes.
pub async fn run<R, W>(correlator: Arc<Correlator>, input: R, mut output: W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let command = line.trim();
        if command.is_empty() {
            continue;
        }
        tracing::debug!(command, "console command");
        let outcome = correlator.send_and_await(command).await;
        output.write_all(format!("{outcome}\n").as_bytes()).await?;
        output.flush().await?;
    }
    tracing::debug!("console input closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use toby_modem::queue::{ReceiveQueue, TransmitQueue};
    use toby_modem::Timings;

    #[tokio::test(start_paused = true)]
    async fn prints_outcomes_in_order() {
        let tx = TransmitQueue::new();
        let rx = ReceiveQueue::new();
        let correlator = Arc::new(Correlator::new(tx.clone(), rx.clone(), &Timings::default()));

        let modem = tokio::spawn(async move {
            let mut answered = 0;
            while answered < 2 {
                while let Some(command) = tx.pop() {
                    match command.as_str() {
                        "AT+CREG?" => {
                            rx.push("+CREG: 0,1".into());
                            rx.push("OK".into());
                        }
                        _ => rx.push("+CME ERROR: unknown".into()),
                    }
                    answered += 1;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        });

        let input: &[u8] = b"AT+CREG?\n\n  AT+BOGUS  \n";
        let mut output = Vec::new();
        run(correlator, input, &mut output).await.unwrap();
        modem.await.unwrap();

        assert_eq!(
            String::from_utf8(output).unwrap(),
            "Success: true Response: 0,1\nSuccess: false Response: +CME ERROR: unknown\n"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn silent_modem_reports_timeout() {
        let correlator = Arc::new(Correlator::new(
            TransmitQueue::new(),
            ReceiveQueue::new(),
            &Timings::default(),
        ));
        let input: &[u8] = b"ATI\n";
        let mut output = Vec::new();
        run(correlator, input, &mut output).await.unwrap();
        assert_eq!(
            String::from_utf8(output).unwrap(),
            "Success: false Response: Timed out waiting for response\n"
        );
    }
}
