//! Text rendering of snapshots and notifications.
//!
//! The terminal is append-only, so instead of redrawing a view the renderer
//! compares consecutive snapshots and prints what changed.

use tandem_app::{Conversation, Delivery, Message, Notification, Ringtone, Snapshot};
use tandem_core::{CallDirection, CallStatus, ConnectionStatus};
use tandem_proto::UserId;

/// One line for a notification.
pub fn notification(notification: &Notification) -> Option<String> {
    let line = match notification {
        Notification::Connected { user } => format!("* connected as {user}"),
        Notification::ConnectionLost { reason } => format!("* connection lost: {reason}"),
        Notification::GaveUp { attempts } => {
            format!("* gave up after {attempts} attempts, /connect to retry")
        },
        Notification::NewMessage { from, name, preview } => {
            format!("* {} ({from}): {preview}", name.as_deref().unwrap_or("new message"))
        },
        Notification::IncomingCall { from, name } => format!(
            "* incoming call from {} ({from}), /accept or /reject",
            name.as_deref().unwrap_or("unknown")
        ),
        Notification::CallEnded { remote, error: None } => format!("* call with {remote} ended"),
        Notification::CallEnded { remote, error: Some(error) } => {
            format!("* call with {remote} failed: {error}")
        },
        Notification::SendFailed { to, .. } => format!("* message to {to} was not delivered"),
        Notification::Ringtone(Some(Ringtone::Incoming)) => "* ring ring".to_string(),
        Notification::Ringtone(Some(Ringtone::Outgoing)) => "* ringing...".to_string(),
        Notification::Ringtone(None) => return None,
        Notification::Error { message } => format!("! {message}"),
    };
    Some(line)
}

/// Lines describing how `next` differs from `prev`.
pub fn changes(prev: &Snapshot, next: &Snapshot) -> Vec<String> {
    let mut lines = Vec::new();

    if prev.connection != next.connection {
        lines.push(format!("* {}", connection(next)));
    }
    if next.reconnecting && !prev.reconnecting {
        lines.push("* reconnecting...".to_string());
    }

    if prev.active != next.active {
        match next.active {
            Some(with) => {
                lines.push(format!("-- {} --", name_of(next, with)));
                lines.extend(next.thread.iter().map(|m| message(next, m)));
            },
            None => lines.push("-- conversation closed --".to_string()),
        }
    } else {
        for m in &next.thread {
            if is_new(prev, m) {
                lines.push(message(next, m));
            } else if m.delivery == Delivery::Failed
                && prev.thread.iter().any(|p| p.id == m.id && p.delivery != Delivery::Failed)
            {
                lines.push(format!("! not delivered: {}", m.content));
            }
        }
    }

    if prev.call.status != next.call.status {
        lines.push(call(next));
    } else if next.call.status.is_active() {
        let (p, n) = (&prev.call, &next.call);
        if p.muted != n.muted {
            lines.push(format!("~ microphone {}", if n.muted { "muted" } else { "on" }));
        }
        if p.video_off != n.video_off {
            lines.push(format!("~ camera {}", if n.video_off { "off" } else { "on" }));
        }
        if p.screen_sharing != n.screen_sharing {
            lines.push(format!("~ screen sharing {}", if n.screen_sharing { "on" } else { "off" }));
        }
    }

    if next.status_message != prev.status_message {
        if let Some(status) = &next.status_message {
            lines.push(format!("* {status}"));
        }
    }

    lines
}

/// The conversation list, one line per conversation.
pub fn conversations(snapshot: &Snapshot) -> Vec<String> {
    if snapshot.conversations.is_empty() {
        return vec!["(no conversations)".to_string()];
    }
    snapshot.conversations.iter().map(|c| conversation(c, snapshot.active == Some(c.id))).collect()
}

fn conversation(c: &Conversation, active: bool) -> String {
    let mut line = format!(
        "{} {:>4} {}{}",
        if active { '>' } else { ' ' },
        c.id.get(),
        c.display_name(),
        if c.online { " (online)" } else { "" }
    );
    if c.unread > 0 {
        line.push_str(&format!(" [{}]", c.unread));
    }
    if let Some(last) = &c.last_message {
        line.push_str(&format!(": {last}"));
    }
    line
}

fn connection(snapshot: &Snapshot) -> String {
    match (snapshot.connection, snapshot.user) {
        (ConnectionStatus::Connected, Some(user)) => format!("online as {user}"),
        (ConnectionStatus::Connected, None) => "online".to_string(),
        (ConnectionStatus::Connecting, _) => "connecting...".to_string(),
        (ConnectionStatus::Disconnected, _) if snapshot.gave_up => "offline (gave up)".to_string(),
        (ConnectionStatus::Disconnected, _) => "offline".to_string(),
    }
}

fn call(snapshot: &Snapshot) -> String {
    let call = &snapshot.call;
    let who = call.remote.map_or_else(String::new, |remote| {
        call.remote_name.clone().unwrap_or_else(|| name_of(snapshot, remote))
    });
    let kind = if call.video { "video call" } else { "call" };
    match call.status {
        CallStatus::Idle => "~ no call".to_string(),
        CallStatus::Connecting => format!("~ {kind} with {who}: connecting"),
        CallStatus::Ringing => match call.direction {
            Some(CallDirection::Incoming) => format!("~ {who} is calling"),
            _ => format!("~ calling {who}"),
        },
        CallStatus::Connected => format!("~ {kind} with {who}: connected"),
        CallStatus::Ended => match &call.last_error {
            Some(error) => format!("~ {kind} with {who} ended: {error}"),
            None => format!("~ {kind} with {who} ended"),
        },
    }
}

fn message(snapshot: &Snapshot, m: &Message) -> String {
    let author = if m.is_me { "me".to_string() } else { name_of(snapshot, m.sender) };
    let marker = match (m.is_me, m.delivery) {
        (true, Delivery::Pending) => " (sending)",
        (true, Delivery::Failed) => " (failed)",
        _ => "",
    };
    format!("[{}] {author}: {}{marker}", m.timestamp.format("%H:%M"), m.content)
}

fn name_of(snapshot: &Snapshot, user: UserId) -> String {
    snapshot
        .conversations
        .iter()
        .find(|c| c.id == user)
        .map_or_else(|| format!("user {user}"), Conversation::display_name)
}

// The relay echo replaces a pending message's local id with a server id;
// that confirmation is not a new line.
fn is_new(prev: &Snapshot, m: &Message) -> bool {
    if prev.thread.iter().any(|p| p.id == m.id) {
        return false;
    }
    !(m.is_me
        && m.id.is_confirmed()
        && prev.thread.iter().any(|p| p.is_me && !p.id.is_confirmed() && p.content == m.content))
}
