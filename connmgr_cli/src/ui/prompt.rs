use std::io::{self, BufRead, Write};

/// Interactive input capability for the setup wizard and confirmations.
///
/// The core crates never prompt; only the CLI façade depends on this.
pub trait Prompter {
    /// Asks until `validate` accepts the trimmed input.
    fn prompt_text(
        &self,
        message: &str,
        validate: &dyn Fn(&str) -> bool,
        invalid_message: &str,
    ) -> io::Result<String>;

    /// Asks for an integer in `min..=max`; empty input takes the default.
    fn prompt_number(&self, message: &str, min: u32, max: u32, default: u32) -> io::Result<u32>;

    /// Yes/no question; empty input takes the default.
    fn confirm(&self, message: &str, default: bool) -> io::Result<bool>;
}

/// Line-oriented prompter over stdin/stdout.
pub struct StdinPrompter;

impl StdinPrompter {
    fn read_line(&self, message: &str) -> io::Result<String> {
        print!("{message} ");
        io::stdout().flush()?;
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim().to_string())
    }
}

impl Prompter for StdinPrompter {
    fn prompt_text(
        &self,
        message: &str,
        validate: &dyn Fn(&str) -> bool,
        invalid_message: &str,
    ) -> io::Result<String> {
        loop {
            let input = self.read_line(message)?;
            if validate(&input) {
                return Ok(input);
            }
            println!("{invalid_message}");
        }
    }

    fn prompt_number(&self, message: &str, min: u32, max: u32, default: u32) -> io::Result<u32> {
        loop {
            let input = self.read_line(&format!("{message} [{default}]"))?;
            if input.is_empty() {
                return Ok(default);
            }
            match input.parse::<u32>() {
                Ok(n) if (min..=max).contains(&n) => return Ok(n),
                _ => println!("Enter a number between {min} and {max}"),
            }
        }
    }

    fn confirm(&self, message: &str, default: bool) -> io::Result<bool> {
        let hint = if default { "[Y/n]" } else { "[y/N]" };
        loop {
            let input = self.read_line(&format!("{message} {hint}"))?.to_lowercase();
            match input.as_str() {
                "" => return Ok(default),
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => println!("Please answer 'y' or 'n'"),
            }
        }
    }
}
