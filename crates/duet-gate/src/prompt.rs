//! Mode changes driven by user input

use duet_core::{ModeConfig, ModeTrigger, WorkflowMode};

/// What a submitted prompt asks of the mode gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptOutcome {
    /// Emergency-stop keyword: force discussion, whatever the current mode
    Emergency { keyword: String },
    /// Trigger phrase seen while in discussion: switch to implementation
    Trigger { phrase: String },
    /// Leave the mode alone
    NoChange,
}

impl PromptOutcome {
    /// Mode to switch to and the cause to record, if any
    pub fn transition(&self) -> Option<(WorkflowMode, ModeTrigger)> {
        match self {
            Self::Emergency { keyword } => Some((
                WorkflowMode::Discussion,
                ModeTrigger::Emergency {
                    keyword: keyword.clone(),
                },
            )),
            Self::Trigger { phrase } => Some((
                WorkflowMode::Implementation,
                ModeTrigger::Phrase {
                    phrase: phrase.clone(),
                },
            )),
            Self::NoChange => None,
        }
    }

    /// Text injected into the conversation after the change
    pub fn notice(&self) -> Option<String> {
        match self {
            Self::Emergency { keyword } => Some(format!(
                "EMERGENCY STOP ('{}'): switched to DISCUSSION mode. Stop all file \
                 modifications immediately and wait for explicit instructions.",
                keyword
            )),
            Self::Trigger { phrase } => Some(format!(
                "Implementation approved ('{}'): switched to IMPLEMENTATION mode. Carry \
                 out the agreed plan, then return to discussion with `duet mode set discussion`.",
                phrase
            )),
            Self::NoChange => None,
        }
    }
}

/// Decide whether `prompt` changes the workflow mode
///
/// Emergency keywords match case-sensitively anywhere in the prompt and win
/// over everything else. Trigger phrases match case-insensitively, first
/// configured phrase wins, and only count while in discussion mode.
pub fn evaluate_prompt(prompt: &str, mode: WorkflowMode, config: &ModeConfig) -> PromptOutcome {
    if let Some(keyword) = config
        .emergency_keywords
        .iter()
        .find(|k| !k.is_empty() && prompt.contains(k.as_str()))
    {
        return PromptOutcome::Emergency {
            keyword: keyword.clone(),
        };
    }

    if mode != WorkflowMode::Discussion {
        return PromptOutcome::NoChange;
    }

    let lowered = prompt.to_lowercase();
    config
        .trigger_phrases
        .iter()
        .find(|p| !p.trim().is_empty() && lowered.contains(&p.to_lowercase()))
        .map(|phrase| PromptOutcome::Trigger {
            phrase: phrase.clone(),
        })
        .unwrap_or(PromptOutcome::NoChange)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_phrase_in_discussion() {
        let config = ModeConfig::default();
        let outcome = evaluate_prompt(
            "Looks good, Make It So please",
            WorkflowMode::Discussion,
            &config,
        );
        assert_eq!(
            outcome,
            PromptOutcome::Trigger {
                phrase: "make it so".to_string()
            }
        );
        assert_eq!(outcome.transition().unwrap().0, WorkflowMode::Implementation);
    }

    #[test]
    fn test_trigger_phrase_ignored_in_implementation() {
        let config = ModeConfig::default();
        let outcome = evaluate_prompt("go ahead", WorkflowMode::Implementation, &config);
        assert_eq!(outcome, PromptOutcome::NoChange);
    }

    #[test]
    fn test_first_configured_phrase_wins() {
        let config = ModeConfig {
            trigger_phrases: vec!["ship it".to_string(), "ship".to_string()],
            ..ModeConfig::default()
        };
        let outcome = evaluate_prompt("ok ship it", WorkflowMode::Discussion, &config);
        assert_eq!(
            outcome,
            PromptOutcome::Trigger {
                phrase: "ship it".to_string()
            }
        );
    }

    #[test]
    fn test_emergency_keyword_has_priority() {
        let config = ModeConfig::default();
        let outcome = evaluate_prompt(
            "STOP, do not make it so",
            WorkflowMode::Implementation,
            &config,
        );
        assert_eq!(
            outcome,
            PromptOutcome::Emergency {
                keyword: "STOP".to_string()
            }
        );
        let (mode, trigger) = outcome.transition().unwrap();
        assert_eq!(mode, WorkflowMode::Discussion);
        assert!(matches!(trigger, ModeTrigger::Emergency { .. }));
        assert!(outcome.notice().unwrap().contains("EMERGENCY STOP"));

        // Also fires in discussion, ahead of any trigger phrase
        let outcome = evaluate_prompt("SILENCE. go ahead", WorkflowMode::Discussion, &config);
        assert!(matches!(outcome, PromptOutcome::Emergency { .. }));
    }

    #[test]
    fn test_emergency_keyword_is_case_sensitive() {
        let config = ModeConfig::default();
        let outcome = evaluate_prompt("please stop here", WorkflowMode::Implementation, &config);
        assert_eq!(outcome, PromptOutcome::NoChange);
    }

    #[test]
    fn test_plain_prompt_changes_nothing() {
        let config = ModeConfig::default();
        let outcome = evaluate_prompt("what does this function do?", WorkflowMode::Discussion, &config);
        assert_eq!(outcome, PromptOutcome::NoChange);
        assert!(outcome.notice().is_none());
    }
}
