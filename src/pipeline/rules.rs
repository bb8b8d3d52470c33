//! Deterministic parser for inbox-management instructions.
//!
//! Turns "Label the last email as Important and archive it" into an
//! `InboxInstruction` without a model call. Anything the parser cannot pin
//! down (no operation, no label name, no target, a destructive operation we
//! don't support) comes back as an `Ambiguity`, and the handler asks the user
//! instead of guessing.

use regex::Regex;
use tracing::debug;

/// One mailbox operation requested by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboxAction {
    Label { name: String },
    Archive,
}

impl InboxAction {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Label { .. } => "label",
            Self::Archive => "archive",
        }
    }
}

/// Which message the instruction refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageTarget {
    /// Provider message id given verbatim.
    MessageId(String),
    /// The newest message in the inbox.
    MostRecent,
    /// Message(s) from a sender; `newest` when the user said "last"/"latest".
    FromSender { sender: String, newest: bool },
    /// Message(s) whose subject mentions a phrase.
    AboutSubject { subject: String, newest: bool },
}

/// A fully resolved instruction: actions in the order the user gave them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboxInstruction {
    pub actions: Vec<InboxAction>,
    pub target: MessageTarget,
}

/// Why an instruction cannot be executed as given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ambiguity {
    NoOperation,
    MissingLabel,
    NoTarget,
    Unsupported { operation: String },
}

impl Ambiguity {
    /// Clarification question for the user.
    pub fn clarification(&self) -> String {
        match self {
            Self::NoOperation => {
                "I can label or archive emails. What would you like me to do?".into()
            }
            Self::MissingLabel => {
                "Which label should I apply? For example: \"label the latest email as Important\"."
                    .into()
            }
            Self::NoTarget => "Which email do you mean? You can say \"the latest email\", \
                 \"the email from alice@example.com\", or give a message id."
                .into(),
            Self::Unsupported { operation } => {
                format!("I can't {operation} emails. I can label or archive them instead.")
            }
        }
    }
}

/// Regex-based instruction parser.
pub struct InstructionParser {
    destructive: Regex,
    label_verb: Regex,
    label_name: Regex,
    archive_verb: Regex,
    message_id: Regex,
    from_sender: Regex,
    about_subject: Regex,
    /// Sender or subject phrasing the target regexes can't resolve.
    loose_reference: Regex,
    most_recent: Regex,
}

impl Default for InstructionParser {
    fn default() -> Self {
        Self::new()
    }
}

impl InstructionParser {
    pub fn new() -> Self {
        Self {
            destructive: Regex::new(r"(?i)\b(delete|trash|erase|purge|destroy)\b")
                .expect("destructive regex"),
            label_verb: Regex::new(r"(?i)\b(label|tag|mark)\b").expect("label verb regex"),
            label_name: Regex::new(
                r#"(?i)\b(?:label|tag|mark)\b(?:[^.!?]|\.\S)*?\b(?:as|with)\s+(?:the\s+|a\s+|an\s+)?(?:label\s+|tag\s+)?(?:"([^"]+)"|'([^']+)'|([\w\-/]+))"#,
            )
            .expect("label name regex"),
            archive_verb: Regex::new(r"(?i)\barchiv(?:e|ing)\b").expect("archive regex"),
            message_id: Regex::new(
                r"(?i)(?:\b(?:message|email|mail)\s+(?:id\s+)?#?|\bid\s*[:#]?\s*|#)(\d+)\b",
            )
            .expect("message id regex"),
            from_sender: Regex::new(
                r"(?i)\b(?:emails?|messages?|mail)\s+from\s+(?:the\s+)?([\w.+\-]+@[\w\-]+(?:\.[\w\-]+)+|[a-z][\w.\-]*)",
            )
            .expect("sender regex"),
            about_subject: Regex::new(
                r#"(?i)\b(?:emails?|messages?|mail)\s+(?:about|regarding|titled|with\s+(?:the\s+)?subject)\s+["']?([^"'.!?]+?)["']?\s*(?:$|[.!?,]|\s+and\b)"#,
            )
            .expect("subject regex"),
            loose_reference: Regex::new(
                r"(?i)\b(?:from|by|about|regarding|titled)\s+\S|\b\w+'s\s+(?:(?:last|latest|newest|most\s+recent|recent|top|new)\s+)?(?:emails?|messages?|mail)\b",
            )
            .expect("loose reference regex"),
            most_recent: Regex::new(
                r"(?i)\b(?:last|latest|most\s+recent|newest|recent|top)\b",
            )
            .expect("most recent regex"),
        }
    }

    /// Parse an instruction.
    pub fn parse(&self, text: &str) -> Result<InboxInstruction, Ambiguity> {
        if let Some(m) = self.destructive.find(text) {
            debug!(operation = m.as_str(), "Refusing destructive inbox operation");
            return Err(Ambiguity::Unsupported {
                operation: m.as_str().to_lowercase(),
            });
        }

        let actions = self.actions(text)?;
        let target = self.target(text).ok_or(Ambiguity::NoTarget)?;
        Ok(InboxInstruction { actions, target })
    }

    fn actions(&self, text: &str) -> Result<Vec<InboxAction>, Ambiguity> {
        let mut found: Vec<(usize, InboxAction)> = Vec::new();

        if let Some(verb) = self.label_verb.find(text) {
            let caps = self
                .label_name
                .captures(text)
                .ok_or(Ambiguity::MissingLabel)?;
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .or_else(|| caps.get(3))
                .map(|m| m.as_str().trim().to_string())
                .filter(|n| !n.is_empty())
                .ok_or(Ambiguity::MissingLabel)?;
            if name.eq_ignore_ascii_case("read") || name.eq_ignore_ascii_case("unread") {
                return Err(Ambiguity::Unsupported {
                    operation: format!("mark as {}", name.to_lowercase()),
                });
            }
            found.push((verb.start(), InboxAction::Label { name }));
        }

        if let Some(verb) = self.archive_verb.find(text) {
            found.push((verb.start(), InboxAction::Archive));
        }

        if found.is_empty() {
            return Err(Ambiguity::NoOperation);
        }
        found.sort_by_key(|(pos, _)| *pos);
        Ok(found.into_iter().map(|(_, a)| a).collect())
    }

    fn target(&self, text: &str) -> Option<MessageTarget> {
        if let Some(caps) = self.message_id.captures(text) {
            return Some(MessageTarget::MessageId(caps[1].to_string()));
        }

        let newest = self.most_recent.is_match(text);

        if let Some(caps) = self.from_sender.captures(text) {
            let sender = caps[1].trim_end_matches('.').to_string();
            return Some(MessageTarget::FromSender { sender, newest });
        }

        if let Some(caps) = self.about_subject.captures(text) {
            let subject = caps[1].trim().to_string();
            if !subject.is_empty() {
                return Some(MessageTarget::AboutSubject { subject, newest });
            }
        }

        // "the newest email" only counts when nothing else narrows it down.
        if newest && !self.loose_reference.is_match(text) {
            return Some(MessageTarget::MostRecent);
        }

        None
    }
}
