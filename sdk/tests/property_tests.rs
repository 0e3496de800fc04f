use proptest::prelude::*;
use sdk::errors::{EngineError, TasksbotErrorExt};
use sdk::types::BotCommand;

// User hints are static strings and never echo the wrapped detail back to a chat
proptest! {
    #[test]
    fn test_error_user_hint_completeness(detail in "[a-zA-Z0-9/_.-]{8,40}") {
        let errs = vec![
            EngineError::Config(detail.clone()),
            EngineError::InvalidDirectionConfig(detail.clone()),
            EngineError::UnknownDirection(detail.clone()),
            EngineError::UnknownFlow { direction: detail.clone(), flow: detail.clone() },
            EngineError::Validation { field: detail.clone(), reason: detail.clone() },
            EngineError::PolicyViolation { field: detail.clone(), rule: detail.clone() },
            EngineError::StorageUnavailable(detail.clone()),
        ];

        for err in errs {
            let hint = err.user_hint();
            prop_assert!(!hint.is_empty());
            prop_assert!(!hint.contains(&detail));
        }
    }
}

// Any slash command survives parsing with its name lowercased and argument trimmed
proptest! {
    #[test]
    fn test_command_parsing(
        name in "[a-zA-Z]{1,12}",
        argument in proptest::option::of("[a-z0-9-]{1,16}"),
    ) {
        let text = match &argument {
            Some(arg) => format!("/{}   {}  ", name, arg),
            None => format!("/{}", name),
        };

        let parsed = BotCommand::parse(&text).expect("command should parse");
        prop_assert_eq!(parsed.name, name.to_lowercase());
        prop_assert_eq!(parsed.argument, argument);
    }

    #[test]
    fn test_plain_text_never_parses(text in "[a-zA-Z0-9 ]{0,30}") {
        prop_assert!(BotCommand::parse(&text).is_none());
    }
}
