//! Slash-command parsing.
//!
//! Each input line is either a `/command` or plain text. Plain text is sent
//! to the open conversation.

use tandem_app::{AppHandle, RuntimeStopped, Snapshot};
use tandem_core::MediaOptions;
use tandem_proto::UserId;
use thiserror::Error;

/// Help text listing every command.
pub const HELP: &str = "\
/connect <user>      sign in as <user>
/logout              disconnect and clear state
/reload              refetch the conversation list
/list                show conversations
/open <user>         open the conversation with <user>
/close               close the open conversation
/send <user> <text>  send <text> to <user>
/read [user]         mark a conversation read
/call <user>         start an audio call
/video <user>        start a video call
/accept [video]      accept the incoming call
/reject              decline the incoming call
/end                 hang up
/mute                toggle the microphone
/cam                 toggle the camera
/share               start screen sharing
/unshare             stop screen sharing
/help                show this text
/quit                exit";

/// Input that could not be turned into a [`Command`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The command name is not known.
    #[error("unknown command /{0}, try /help")]
    Unknown(String),

    /// Arguments are missing or malformed.
    #[error("usage: {0}")]
    Usage(&'static str),

    /// A user id did not parse.
    #[error("invalid user id: {0}")]
    InvalidUser(String),

    /// Plain text typed with no conversation open.
    #[error("no conversation open, use /open <user> first")]
    NoConversation,

    /// The runtime has exited.
    #[error(transparent)]
    Stopped(#[from] RuntimeStopped),
}

/// A parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Sign in.
    Connect(UserId),
    /// Sign out.
    Logout,
    /// Refetch conversations.
    Reload,
    /// Print the conversation list.
    List,
    /// Open a conversation.
    Open(UserId),
    /// Close the open conversation.
    Close,
    /// Send to an explicit recipient.
    Send {
        /// Recipient
        to: UserId,
        /// Text
        text: String,
    },
    /// Plain text for the open conversation.
    Say(String),
    /// Mark a conversation read; the open one when `None`.
    Read(Option<UserId>),
    /// Place a call.
    Call {
        /// Callee
        to: UserId,
        /// Capture the camera too
        video: bool,
    },
    /// Accept the incoming call.
    Accept {
        /// Capture the camera too
        video: bool,
    },
    /// Decline the incoming call.
    Reject,
    /// Hang up.
    End,
    /// Toggle the microphone.
    Mute,
    /// Toggle the camera.
    Camera,
    /// Start screen sharing.
    Share,
    /// Stop screen sharing.
    Unshare,
    /// Print help.
    Help,
    /// Exit.
    Quit,
}

impl Command {
    /// Parse one input line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>, CommandError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Some(Self::Say(line.to_string())));
        };

        let (name, args) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        let args = args.trim();

        let command = match name {
            "connect" => Self::Connect(user_arg(args, "/connect <user>")?),
            "logout" => Self::Logout,
            "reload" => Self::Reload,
            "list" | "ls" => Self::List,
            "open" => Self::Open(user_arg(args, "/open <user>")?),
            "close" => Self::Close,
            "send" => {
                let (to, text) =
                    args.split_once(char::is_whitespace).ok_or(CommandError::Usage("/send <user> <text>"))?;
                let text = text.trim();
                if text.is_empty() {
                    return Err(CommandError::Usage("/send <user> <text>"));
                }
                Self::Send { to: parse_user(to)?, text: text.to_string() }
            },
            "read" => {
                if args.is_empty() {
                    Self::Read(None)
                } else {
                    Self::Read(Some(parse_user(args)?))
                }
            },
            "call" => Self::Call { to: user_arg(args, "/call <user>")?, video: false },
            "video" => Self::Call { to: user_arg(args, "/video <user>")?, video: true },
            "accept" => match args {
                "" | "audio" => Self::Accept { video: false },
                "video" => Self::Accept { video: true },
                _ => return Err(CommandError::Usage("/accept [video]")),
            },
            "reject" => Self::Reject,
            "end" | "hangup" => Self::End,
            "mute" => Self::Mute,
            "cam" => Self::Camera,
            "share" => Self::Share,
            "unshare" => Self::Unshare,
            "help" | "h" => Self::Help,
            "quit" | "q" => Self::Quit,
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(Some(command))
    }

    /// Submit the command to the runtime.
    ///
    /// `snapshot` resolves commands that act on the open conversation.
    /// [`Command::Help`] and [`Command::List`] only print, so they are no-ops
    /// here.
    pub fn apply(self, handle: &AppHandle, snapshot: &Snapshot) -> Result<(), CommandError> {
        match self {
            Self::Connect(user) => handle.connect(user)?,
            Self::Logout => handle.logout()?,
            Self::Reload => handle.reload()?,
            Self::Open(user) => handle.open_conversation(user)?,
            Self::Close => handle.close_conversation()?,
            Self::Send { to, text } => handle.send_message(to, text)?,
            Self::Say(text) => {
                let to = snapshot.active.ok_or(CommandError::NoConversation)?;
                handle.send_message(to, text)?;
            },
            Self::Read(user) => {
                let with = user.or(snapshot.active).ok_or(CommandError::NoConversation)?;
                handle.mark_read(with)?;
            },
            Self::Call { to, video } => handle.start_call(to, media(video))?,
            Self::Accept { video } => handle.accept_call(media(video))?,
            Self::Reject => handle.reject_call()?,
            Self::End => handle.end_call()?,
            Self::Mute => handle.toggle_mute()?,
            Self::Camera => handle.toggle_video()?,
            Self::Share => handle.start_screen_share()?,
            Self::Unshare => handle.stop_screen_share()?,
            Self::Help | Self::List => {},
            Self::Quit => handle.quit()?,
        }
        Ok(())
    }
}

fn media(video: bool) -> MediaOptions {
    if video { MediaOptions::VIDEO } else { MediaOptions::AUDIO }
}

fn user_arg(args: &str, usage: &'static str) -> Result<UserId, CommandError> {
    if args.is_empty() {
        return Err(CommandError::Usage(usage));
    }
    parse_user(args)
}

fn parse_user(text: &str) -> Result<UserId, CommandError> {
    UserId::parse(text).map_err(|_| CommandError::InvalidUser(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(raw: u64) -> UserId {
        UserId::new(raw).unwrap()
    }

    fn parse(line: &str) -> Command {
        Command::parse(line).unwrap().unwrap()
    }

    #[test]
    fn blank_lines_are_ignored() {
        assert_eq!(Command::parse("   ").unwrap(), None);
    }

    #[test]
    fn plain_text_goes_to_the_open_conversation() {
        assert_eq!(parse("  hello there "), Command::Say("hello there".into()));
    }

    #[test]
    fn send_keeps_inner_whitespace() {
        assert_eq!(parse("/send 7 see  you"), Command::Send { to: uid(7), text: "see  you".into() });
    }

    #[test]
    fn send_without_text_is_a_usage_error() {
        assert_eq!(Command::parse("/send 7"), Err(CommandError::Usage("/send <user> <text>")));
        assert_eq!(Command::parse("/send 7   "), Err(CommandError::Usage("/send <user> <text>")));
    }

    #[test]
    fn user_ids_are_validated() {
        assert_eq!(Command::parse("/open 0"), Err(CommandError::InvalidUser("0".into())));
        assert_eq!(Command::parse("/call bob"), Err(CommandError::InvalidUser("bob".into())));
        assert_eq!(Command::parse("/connect"), Err(CommandError::Usage("/connect <user>")));
    }

    #[test]
    fn call_variants() {
        assert_eq!(parse("/call 3"), Command::Call { to: uid(3), video: false });
        assert_eq!(parse("/video 3"), Command::Call { to: uid(3), video: true });
        assert_eq!(parse("/accept"), Command::Accept { video: false });
        assert_eq!(parse("/accept video"), Command::Accept { video: true });
        assert!(Command::parse("/accept maybe").is_err());
    }

    #[test]
    fn read_defaults_to_open_conversation() {
        assert_eq!(parse("/read"), Command::Read(None));
        assert_eq!(parse("/read 4"), Command::Read(Some(uid(4))));
    }

    #[test]
    fn aliases() {
        assert_eq!(parse("/q"), Command::Quit);
        assert_eq!(parse("/hangup"), Command::End);
        assert_eq!(parse("/h"), Command::Help);
    }

    #[test]
    fn unknown_command() {
        let err = Command::parse("/dance").unwrap_err();
        assert_eq!(err.to_string(), "unknown command /dance, try /help");
    }

    #[test]
    fn help_lists_every_command() {
        for name in [
            "connect", "logout", "reload", "list", "open", "close", "send", "read", "call", "video", "accept",
            "reject", "end", "mute", "cam", "share", "unshare", "help", "quit",
        ] {
            assert!(HELP.contains(&format!("/{name}")), "help is missing /{name}");
        }
    }
}
