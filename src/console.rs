//! Admin console: stdin/stdout REPL for operating the pool.

use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::accounts::AccountStatus;
use crate::monitor::HealthMonitor;
use crate::pool::PoolOrchestrator;
use crate::store::AccountStore;

const HELP: &str = "\
commands:
  enroll <phone>                 request an authorization code
  auth <phone> <code>            complete authorization
  send <target> <text...>        send through the next eligible account
  status <phone> <status>        set active | disabled | blocked
  sweep                          run a health sweep now
  list                           show every account
  quit                           exit";

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Enroll { phone: String },
    Auth { phone: String, code: String },
    Send { target: String, text: String },
    Status { phone: String, status: AccountStatus },
    Sweep,
    List,
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let (head, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();
        let args: Vec<&str> = rest.split_whitespace().collect();

        match head.to_ascii_lowercase().as_str() {
            "enroll" => match args.as_slice() {
                [phone] => Ok(Self::Enroll {
                    phone: phone.to_string(),
                }),
                _ => Err("usage: enroll <phone>".into()),
            },
            "auth" => match args.as_slice() {
                [phone, code] => Ok(Self::Auth {
                    phone: phone.to_string(),
                    code: code.to_string(),
                }),
                _ => Err("usage: auth <phone> <code>".into()),
            },
            "send" => {
                let (target, text) = rest
                    .split_once(char::is_whitespace)
                    .ok_or_else(|| "usage: send <target> <text...>".to_string())?;
                let text = text.trim();
                if text.is_empty() {
                    return Err("usage: send <target> <text...>".into());
                }
                Ok(Self::Send {
                    target: target.to_string(),
                    text: text.to_string(),
                })
            }
            "status" => match args.as_slice() {
                [phone, status] => Ok(Self::Status {
                    phone: phone.to_string(),
                    status: status.parse()?,
                }),
                _ => Err("usage: status <phone> <active|disabled|blocked>".into()),
            },
            "sweep" => Ok(Self::Sweep),
            "list" | "ls" => Ok(Self::List),
            "help" | "?" => Ok(Self::Help),
            "quit" | "exit" | "/quit" => Ok(Self::Quit),
            other => Err(format!("unknown command '{other}', try 'help'")),
        }
    }
}

pub struct Console {
    pool: Arc<PoolOrchestrator>,
    monitor: Arc<HealthMonitor>,
    store: Arc<dyn AccountStore>,
}

impl Console {
    pub fn new(
        pool: Arc<PoolOrchestrator>,
        monitor: Arc<HealthMonitor>,
        store: Arc<dyn AccountStore>,
    ) -> Self {
        Self {
            pool,
            monitor,
            store,
        }
    }

    /// Read commands from stdin until EOF or `quit`.
    pub async fn run(&self) -> anyhow::Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        eprint!("> ");

        while let Some(line) = lines.next_line().await.context("reading stdin")? {
            if line.trim().is_empty() {
                eprint!("> ");
                continue;
            }
            match Command::parse(&line) {
                Ok(Command::Quit) => break,
                Ok(command) => match self.execute(command).await {
                    Ok(output) => println!("{output}"),
                    Err(e) => eprintln!("error: {e:#}"),
                },
                Err(usage) => eprintln!("{usage}"),
            }
            eprint!("> ");
        }
        Ok(())
    }

    pub async fn execute(&self, command: Command) -> anyhow::Result<String> {
        match command {
            Command::Enroll { phone } => {
                let account = self.pool.enroll(&phone).await?;
                Ok(format!(
                    "code requested for {} (account {})",
                    account.phone, account.id
                ))
            }
            Command::Auth { phone, code } => {
                if self.pool.complete_authorization(&phone, &code).await {
                    Ok(format!("{phone} authorized"))
                } else {
                    anyhow::bail!("authorization failed for {phone}")
                }
            }
            Command::Send { target, text } => {
                match self
                    .pool
                    .dispatch(&target, &text)
                    .await
                    .context("selecting account")?
                {
                    Some(account) => Ok(format!(
                        "sent via {} ({} today, {} left)",
                        account.phone,
                        account.daily_messages,
                        self.pool.policy().remaining_today(&account)
                    )),
                    None => anyhow::bail!("no account could deliver the message"),
                }
            }
            Command::Status { phone, status } => {
                if self.pool.update_status(&phone, status).await {
                    Ok(format!("{phone} is now {status}"))
                } else {
                    anyhow::bail!("no account with phone {phone}")
                }
            }
            Command::Sweep => {
                let report = self.monitor.sweep_all().await.context("running sweep")?;
                Ok(report.to_string())
            }
            Command::List => {
                let accounts = self.store.list_accounts().await.context("listing accounts")?;
                if accounts.is_empty() {
                    return Ok("no accounts".into());
                }
                let mut out = String::new();
                for account in accounts {
                    let last_used = account
                        .last_used
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_else(|| "never".into());
                    out.push_str(&format!(
                        "{:>4}  {:<16} {:<9} {:>3}/{}  auth={}  last={}  errors={}\n",
                        account.id,
                        account.phone,
                        account.status,
                        account.daily_messages,
                        self.pool.policy().daily_cap(),
                        if account.is_authorized() { "yes" } else { "no" },
                        last_used,
                        self.monitor.error_count(account.id).await,
                    ));
                }
                Ok(out.trim_end().to_string())
            }
            Command::Help => Ok(HELP.to_string()),
            Command::Quit => Ok(String::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!(
            Command::parse("enroll +15551234567"),
            Ok(Command::Enroll {
                phone: "+15551234567".into()
            })
        );
        assert_eq!(
            Command::parse("AUTH +15551234567 12345"),
            Ok(Command::Auth {
                phone: "+15551234567".into(),
                code: "12345".into()
            })
        );
        assert_eq!(Command::parse("  sweep "), Ok(Command::Sweep));
        assert_eq!(Command::parse("exit"), Ok(Command::Quit));
    }

    #[test]
    fn send_keeps_full_text() {
        assert_eq!(
            Command::parse("send @alice hello there,  friend"),
            Ok(Command::Send {
                target: "@alice".into(),
                text: "hello there,  friend".into()
            })
        );
        assert!(Command::parse("send @alice").is_err());
    }

    #[test]
    fn status_parses_value() {
        assert_eq!(
            Command::parse("status +15551234567 Blocked"),
            Ok(Command::Status {
                phone: "+15551234567".into(),
                status: AccountStatus::Blocked
            })
        );
        assert!(Command::parse("status +15551234567 paused").is_err());
    }

    #[test]
    fn rejects_unknown_and_malformed() {
        assert!(Command::parse("frobnicate").is_err());
        assert!(Command::parse("enroll").is_err());
        assert!(Command::parse("auth +1555").is_err());
    }
}
