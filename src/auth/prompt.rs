use std::io::{self, BufRead, Write};

/// Asks the user for an upstream server password. `None` means they declined.
pub trait CredentialPrompt: Send + Sync {
    fn server_password(&self, server_url: &str) -> Option<String>;
}

/// Reads the password as one line from stdin.
pub struct StdinPrompt;

impl CredentialPrompt for StdinPrompt {
    fn server_password(&self, server_url: &str) -> Option<String> {
        eprint!("Enter POP3 password for {server_url} (empty to cancel): ");
        io::stderr().flush().ok()?;

        let mut line = String::new();
        io::stdin().lock().read_line(&mut line).ok()?;
        let password = line.trim_end_matches(['\r', '\n']);
        if password.is_empty() {
            None
        } else {
            Some(password.to_string())
        }
    }
}
