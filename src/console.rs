//! Commands typed at the interactive prompt

use std::str::FromStr;

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Start,
    Pause,
    Resume,
    Stop,
    Volume(f32),
    Status,
    Help,
    Quit,
}

pub const HELP: &str =
    "Commands: start, pause, resume, stop, volume <0-1|0-100%>, status, help, quit";

impl FromStr for ConsoleCommand {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let command = words.next().unwrap_or_default().to_lowercase();
        let argument = words.next();
        if words.next().is_some() {
            return Err(format!("Too many arguments: {}", line.trim()));
        }

        let parsed = match (command.as_str(), argument) {
            ("start" | "play", None) => ConsoleCommand::Start,
            ("pause" | "p", None) => ConsoleCommand::Pause,
            ("resume" | "r", None) => ConsoleCommand::Resume,
            ("stop" | "s", None) => ConsoleCommand::Stop,
            ("status" | "?", None) => ConsoleCommand::Status,
            ("help" | "h", None) => ConsoleCommand::Help,
            ("quit" | "q" | "exit", None) => ConsoleCommand::Quit,
            ("volume" | "vol" | "v", Some(level)) => {
                let (number, scale) = match level.strip_suffix('%') {
                    Some(percent) => (percent, 100.0),
                    None => (level, 1.0),
                };
                let value = number
                    .parse::<f32>()
                    .map_err(|_| format!("Not a volume level: {}", level))?
                    / scale;
                if !(0.0..=1.0).contains(&value) {
                    return Err(format!("Volume must be 0-1 or 0-100%, got {}", level));
                }
                ConsoleCommand::Volume(value)
            }
            ("volume" | "vol" | "v", None) => return Err("Usage: volume <0-1|0-100%>".to_string()),
            ("", _) => return Err(HELP.to_string()),
            _ => return Err(format!("Unknown command: {}. {}", line.trim(), HELP)),
        };
        Ok(parsed)
    }
}
