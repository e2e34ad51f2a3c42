use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};

use proxy_mail::Error;
use proxy_mail::auth::{StdinPrompt, secret_store};
use proxy_mail::config::{default_config_path, load_config};
use proxy_mail::domain::message::MessageKey;
use proxy_mail::gpg::{Decryption, GpgTool, SignatureCheck};
use proxy_mail::proxy::HttpTransport;
use proxy_mail::proxy::transport::DEFAULT_TIMEOUT;
use proxy_mail::session::task::cancel_all;
use proxy_mail::session::{FetchTask, MailSession, MessageRow};
use proxy_mail::store::Direction;
use proxy_mail::view::{Edit, RenderedList};

#[derive(Parser)]
#[command(name = "proxy_mail")]
#[command(about = "Read POP3 mailboxes through an HTTP mail proxy", long_about = None)]
struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive session over the configured mailboxes
    Run,

    /// Store the proxy password of an endpoint in keyring
    SetProxyPassword {
        #[arg(long)]
        endpoint: String,
    },
}

const HELP: &str = "\
commands:
  m <n>          select mailbox n
  n              fetch new messages (background)
  a              fetch new messages for all mailboxes
  o              fetch older messages (background)
  cancel         cancel running background fetches
  l              list messages
  open <i>       show message i
  verify <i>     check the signature of message i
  decrypt <i>    decrypt message i
  s              unread / total of the current mailbox
  clear          forget all messages and server passwords
  q              quit";

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(p) => p,
        None => default_config_path()?,
    };

    match cli.cmd {
        Command::SetProxyPassword { endpoint } => {
            let cfg = load_config(&config_path).map_err(|e| anyhow!("Configuration error: {e}"))?;
            cfg.require_endpoint(&endpoint)?;
            eprintln!("Proxy password for {endpoint}:");
            let mut password = String::new();
            io::stdin().lock().read_line(&mut password)?;
            secret_store::save_proxy_password(&endpoint, password.trim_end_matches(['\r', '\n']))?;
            println!("Saved proxy password for endpoint {endpoint}");
            Ok(())
        }
        Command::Run => {
            let mut cfg = load_config(&config_path).map_err(|e| anyhow!("Configuration error: {e}"))?;
            cfg.fill_proxy_passwords(secret_store::load_proxy_password)?;
            let mailboxes = cfg.resolve()?;
            let transport = HttpTransport::new(cfg.timeout().unwrap_or(DEFAULT_TIMEOUT))?;
            let session = MailSession::from_config(mailboxes, Arc::new(transport), Arc::new(StdinPrompt));
            if session.is_empty() {
                return Err(anyhow!("no mailboxes configured in {}", config_path.display()));
            }
            Repl::new(session).run()
        }
    }
}

struct Repl {
    session: MailSession,
    current: usize,
    list: RenderedList<MessageKey>,
    tasks: Vec<(usize, FetchTask)>,
    gpg: GpgTool,
}

impl Repl {
    fn new(session: MailSession) -> Self {
        Self {
            session,
            current: 0,
            list: RenderedList::new(),
            tasks: Vec::new(),
            gpg: GpgTool::default(),
        }
    }

    fn run(mut self) -> Result<()> {
        for (i, summary) in self.session.summaries().iter().enumerate() {
            match &summary.smtp_server {
                Some(smtp) => println!("[{i}] {} (sends via {smtp})", summary.address),
                None => println!("[{i}] {}", summary.address),
            }
        }
        println!("{HELP}");

        let stdin = io::stdin();
        loop {
            if let Err(e) = self.reap() {
                eprintln!("error: {e:#}");
            }
            print!("{}> ", self.current);
            io::stdout().flush()?;

            let mut line = String::new();
            if stdin.lock().read_line(&mut line)? == 0 {
                break;
            }
            let mut words = line.split_whitespace();
            let Some(cmd) = words.next() else { continue };
            let arg = words.next();

            let outcome = match cmd {
                "q" | "quit" => break,
                "h" | "help" => {
                    println!("{HELP}");
                    Ok(())
                }
                "m" => self.select(arg),
                "n" => self.start(Direction::Newer),
                "o" => self.start(Direction::Older),
                "a" => self.fetch_all(),
                "cancel" => {
                    self.tasks.iter().for_each(|(_, t)| t.cancel());
                    Ok(())
                }
                "l" => self.print_list(),
                "open" => self.open(arg),
                "verify" => self.verify(arg),
                "decrypt" => self.decrypt(arg),
                "s" => self
                    .session
                    .status(self.current)
                    .map(|status| println!("{status}"))
                    .map_err(Into::into),
                "clear" => {
                    self.session.clear_all();
                    self.refresh()
                }
                other => Err(anyhow!("unknown command {other:?}, try help")),
            };
            if let Err(e) = outcome {
                eprintln!("error: {e:#}");
            }
        }

        cancel_all(self.tasks.drain(..).map(|(_, t)| t).collect());
        Ok(())
    }

    fn select(&mut self, arg: Option<&str>) -> Result<()> {
        let index: usize = arg.context("usage: m <n>")?.parse()?;
        self.session.mailbox(index)?;
        if let Some(signature) = self
            .session
            .summaries()
            .get(index)
            .and_then(|s| s.signature.clone())
        {
            println!("signature:\n{signature}");
        }
        self.current = index;
        self.list = RenderedList::new();
        self.refresh()
    }

    fn start(&mut self, direction: Direction) -> Result<()> {
        if !self.session.ensure_password(self.current)? {
            return Ok(());
        }
        let task = self.session.spawn(self.current, direction)?;
        self.tasks.push((self.current, task));
        Ok(())
    }

    fn fetch_all(&mut self) -> Result<()> {
        let added = self.session.fetch_new_all()?;
        println!("{added} new message(s)");
        self.refresh()
    }

    /// Collects finished background fetches.
    fn reap(&mut self) -> Result<()> {
        let (done, running): (Vec<_>, Vec<_>) =
            self.tasks.drain(..).partition(|(_, t)| t.is_finished());
        self.tasks = running;
        for (index, task) in done {
            match task.wait() {
                Ok(Some(added)) => println!("[{index}] {added} message(s) fetched"),
                Ok(None) => eprintln!("[{index}] no server password, fetch skipped"),
                Err(Error::Cancelled) => println!("[{index}] fetch cancelled"),
                Err(e) => eprintln!("[{index}] fetch failed: {e}"),
            }
        }
        self.refresh()
    }

    /// Brings the rendered list in line with the store, printing each edit.
    fn refresh(&mut self) -> Result<()> {
        let rows = self.session.rows(self.current)?;
        let keys: Vec<MessageKey> = rows.iter().map(|r| r.key.clone()).collect();
        for edit in self.list.update(&keys)? {
            match edit {
                Edit::Insert { key, position } => {
                    if let Some(row) = rows.iter().find(|r| r.key == key) {
                        println!("+ {}", format_row(position, row));
                    }
                }
                Edit::Delete { key } => println!("- {key}"),
            }
        }
        Ok(())
    }

    fn print_list(&self) -> Result<()> {
        let rows = self.session.rows(self.current)?;
        for (i, row) in rows.iter().enumerate() {
            println!("{}", format_row(i, row));
        }
        Ok(())
    }

    fn key_at(&self, arg: Option<&str>) -> Result<MessageKey> {
        let index: usize = arg.context("missing message index")?.parse()?;
        self.list
            .get(index)
            .cloned()
            .ok_or_else(|| anyhow!("no message at {index}, {} listed", self.list.len()))
    }

    fn body_of(&self, arg: Option<&str>) -> Result<Option<String>> {
        let key = self.key_at(arg)?;
        Ok(self
            .session
            .open_message(self.current, &key.uid)?
            .map(|m| m.body))
    }

    fn open(&mut self, arg: Option<&str>) -> Result<()> {
        let key = self.key_at(arg)?;
        let Some(message) = self.session.open_message(self.current, &key.uid)? else {
            return Ok(());
        };
        println!("Date: {}", message.date);
        println!("From: {}", message.from);
        println!("To: {}", message.to);
        if let Some(cc) = &message.cc {
            println!("Cc: {cc}");
        }
        println!("Subject: {}\n", message.subject);
        println!("{}", message.body);
        Ok(())
    }

    fn verify(&mut self, arg: Option<&str>) -> Result<()> {
        let Some(body) = self.body_of(arg)? else {
            return Ok(());
        };
        match self.gpg.verify(&body)? {
            SignatureCheck::Good { details } => println!("Good signature\n{details}"),
            SignatureCheck::Bad { details } => println!("BAD signature\n{details}"),
            SignatureCheck::Failed { details } => println!("Verification failed\n{details}"),
        }
        Ok(())
    }

    fn decrypt(&mut self, arg: Option<&str>) -> Result<()> {
        let Some(body) = self.body_of(arg)? else {
            return Ok(());
        };
        match self.gpg.decrypt(&body)? {
            Decryption::Decrypted(text) => println!("{text}"),
            Decryption::Failed { details } => println!("Decryption failed\n{details}"),
        }
        Ok(())
    }
}

fn format_row(index: usize, row: &MessageRow) -> String {
    format!(
        "{} {:>3}  {:<16}  {:<24}  {}",
        if row.unread { '*' } else { ' ' },
        index,
        row.date,
        row.from,
        row.subject
    )
}
