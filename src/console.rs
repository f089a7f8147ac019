//! Line-oriented front-end: turns typed commands into `UserCommand`s and
//! session events into status lines.

use crate::machine::{EndReason, SessionEvent, UserCommand};
use crate::moderation::REPORT_REASONS;
use crate::session::ConsentRecord;

pub const HELP: &str = "\
commands:
  agree            confirm you are 18+ and accept the terms
  start            look for a partner
  next             end this chat and find someone new
  end              end the chat
  report <reason>  report the partner (or a number from the list)
  block            block the partner
  quit";

/// What the console wants done with one input line.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Agree,
    Command(UserCommand),
    Help,
}

/// Tracks consent and the current partner between lines.
#[derive(Debug, Default)]
pub struct Console {
    consent: ConsentRecord,
    partner: Option<String>,
}

impl Console {
    pub fn new() -> Self {
        Self::default()
    }

    /// Errors are messages meant for the user.
    pub fn parse(&mut self, line: &str) -> Result<Input, String> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let input = match word.to_ascii_lowercase().as_str() {
            "agree" => {
                self.consent = ConsentRecord::granted();
                Input::Agree
            }
            "start" => Input::Command(UserCommand::StartSearch(self.consent)),
            "next" => Input::Command(UserCommand::Next),
            "end" | "stop" => Input::Command(UserCommand::End),
            "report" => Input::Command(UserCommand::Report(report_reason(rest))),
            "block" => {
                let partner = self
                    .partner
                    .clone()
                    .ok_or_else(|| "nobody to block".to_string())?;
                Input::Command(UserCommand::Block(partner))
            }
            "quit" | "exit" => Input::Command(UserCommand::Shutdown),
            "help" | "?" | "" => Input::Help,
            other => return Err(format!("unknown command '{other}', try 'help'")),
        };
        Ok(input)
    }

    /// Updates the remembered partner and renders the event for the user.
    pub fn observe(&mut self, event: &SessionEvent) -> String {
        match event {
            SessionEvent::Searching => "Looking for someone to chat with...".to_string(),
            SessionEvent::PartnerFound { partner_id, .. } => {
                self.partner = Some(partner_id.clone());
                "Partner found, connecting...".to_string()
            }
            SessionEvent::RemoteTrack(track) => {
                format!("Receiving {:?} from partner", track.kind)
            }
            SessionEvent::Connected => "Connected. Say hi!".to_string(),
            SessionEvent::Ended { reason } => {
                self.partner = None;
                describe_end(reason)
            }
            SessionEvent::CouldNotStart(e) => format!("Could not start chat: {e}"),
            SessionEvent::CommandRejected(e) => format!("Not possible right now: {e}"),
        }
    }
}

/// A bare number picks from `REPORT_REASONS`.
fn report_reason(input: &str) -> String {
    input
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| REPORT_REASONS.get(i))
        .map(|r| r.to_string())
        .unwrap_or_else(|| input.to_string())
}

fn describe_end(reason: &EndReason) -> String {
    match reason {
        EndReason::Hangup => "Chat ended.".to_string(),
        EndReason::PartnerLeft => "Your partner left the chat.".to_string(),
        EndReason::Reported => "Thanks, the report was sent. Chat ended.".to_string(),
        EndReason::Blocked => "Partner blocked. Chat ended.".to_string(),
        EndReason::ChannelLost => "Lost connection to the server.".to_string(),
        EndReason::TransportFailed => "Connection to your partner failed.".to_string(),
        EndReason::NegotiationTimeout => "Could not connect to your partner in time.".to_string(),
        EndReason::Error(e) => format!("Could not start chat: {e}"),
    }
}
