#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Assistant,
}

impl Speaker {
    /// Role label used when the conversation is replayed to the model.
    pub fn label(self) -> &'static str {
        match self {
            Speaker::User => "USER",
            Speaker::Assistant => "MODEL",
        }
    }
}

/// Stable handle to a turn; survives later appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TurnId(usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
}

/// Append-only conversation log.
///
/// Turns are only ever added at the end or edited in place through the id
/// handed out by [`Transcript::push`]; the whole log is dropped on reset.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn push(&mut self, speaker: Speaker, text: impl Into<String>) -> TurnId {
        self.turns.push(Turn {
            speaker,
            text: text.into(),
        });
        TurnId(self.turns.len() - 1)
    }

    #[cfg(test)]
    pub fn get(&self, id: TurnId) -> Option<&Turn> {
        self.turns.get(id.0)
    }

    pub fn append_text(&mut self, id: TurnId, fragment: &str) -> bool {
        match self.turns.get_mut(id.0) {
            Some(turn) => {
                turn.text.push_str(fragment);
                true
            }
            None => false,
        }
    }

    pub fn replace_text(&mut self, id: TurnId, text: impl Into<String>) -> bool {
        match self.turns.get_mut(id.0) {
            Some(turn) => {
                turn.text = text.into();
                true
            }
            None => false,
        }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_stay_valid_after_more_appends() {
        let mut transcript = Transcript::default();
        let question = transcript.push(Speaker::User, "What script is this?");
        let answer = transcript.push(Speaker::Assistant, "");
        transcript.push(Speaker::User, "And the plants?");

        assert!(transcript.append_text(answer, "Voynichese"));
        assert_eq!(transcript.get(answer).unwrap().text, "Voynichese");
        assert_eq!(transcript.get(question).unwrap().text, "What script is this?");
        assert_eq!(transcript.turns().len(), 3);
    }

    #[test]
    fn test_stale_id_after_clear() {
        let mut transcript = Transcript::default();
        let id = transcript.push(Speaker::Assistant, "");
        transcript.clear();
        assert!(!transcript.append_text(id, "late"));
        assert!(!transcript.replace_text(id, "late"));
        assert!(transcript.turns().is_empty());
    }

    #[test]
    fn test_labels() {
        assert_eq!(Speaker::User.label(), "USER");
        assert_eq!(Speaker::Assistant.label(), "MODEL");
    }
}
