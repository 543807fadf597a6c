use super::*;
use clap::Parser;

mod test_helpers {
    use super::*;

    pub(super) fn parse_args(argv: &[&str]) -> Args {
        Args::try_parse_from(argv)
            .unwrap_or_else(|err| panic!("argv={argv:?} should parse successfully: {err}"))
    }

    pub(super) fn assert_rejected(argv: &[&str]) {
        assert!(
            Args::try_parse_from(argv).is_err(),
            "argv={argv:?} should be rejected"
        );
    }
}

use test_helpers::{assert_rejected, parse_args};

#[test]
fn no_subcommand_defaults_to_chat() {
    let args = parse_args(&["coachroom"]);
    assert!(args.command.is_none());
    assert_eq!(args.verbose, 0);
    assert!(!args.ephemeral);
    assert!(args.log.is_none());
}

#[test]
fn verbosity_counts_repeated_flags() {
    let args = parse_args(&["coachroom", "-vvv", "chat"]);
    assert_eq!(args.verbose, 3);
    assert_eq!(args.command, Some(Commands::Chat));

    let args = parse_args(&["coachroom", "chat", "-v"]);
    assert_eq!(args.verbose, 1);
}

#[test]
fn global_flags_follow_subcommands() {
    let argv = ["coachroom", "chat", "--ephemeral", "--log", "talk.md"];
    let args = parse_args(&argv);
    assert!(args.ephemeral);
    assert_eq!(args.log, Some(PathBuf::from("talk.md")));
}

#[test]
fn ask_joins_trailing_words() {
    let args = parse_args(&["coachroom", "ask", "should", "I", "--quit", "my", "job?"]);
    match args.command {
        Some(Commands::Ask { question }) => {
            assert_eq!(question.join(" "), "should I --quit my job?");
        }
        other => panic!("expected ask, got {other:?}"),
    }
}

#[test]
fn ask_requires_a_question() {
    assert_rejected(&["coachroom", "ask"]);
}

#[test]
fn reasoning_accepts_only_on_or_off() {
    let args = parse_args(&["coachroom", "reasoning", "on"]);
    assert_eq!(
        args.command,
        Some(Commands::Reasoning {
            state: Some("on".to_string())
        })
    );

    let args = parse_args(&["coachroom", "reasoning"]);
    assert_eq!(args.command, Some(Commands::Reasoning { state: None }));

    assert_rejected(&["coachroom", "reasoning", "maybe"]);
}

#[test]
fn set_model_takes_model_id() {
    let args = parse_args(&["coachroom", "set-model", "openai/gpt-4o-mini"]);
    assert_eq!(
        args.command,
        Some(Commands::SetModel {
            model: "openai/gpt-4o-mini".to_string()
        })
    );
}

#[test]
fn coach_edit_collects_value_words() {
    let args = parse_args(&[
        "coachroom",
        "coaches",
        "edit",
        "2",
        "prompt",
        "You are a blunt",
        "career coach",
    ]);
    assert_eq!(
        args.command,
        Some(Commands::Coaches {
            command: CoachCommands::Edit {
                id: 2,
                field: "prompt".to_string(),
                value: vec!["You are a blunt".to_string(), "career coach".to_string()],
            }
        })
    );
}

#[test]
fn coach_select_requires_numeric_ids() {
    let args = parse_args(&["coachroom", "coaches", "select", "1", "3"]);
    assert_eq!(
        args.command,
        Some(Commands::Coaches {
            command: CoachCommands::Select { ids: vec![1, 3] }
        })
    );

    assert_rejected(&["coachroom", "coaches", "select"]);
    assert_rejected(&["coachroom", "coaches", "select", "mentor"]);
}

#[test]
fn history_subcommands_parse() {
    let argv = ["coachroom", "history", "show", "1718000000000"];
    assert_eq!(
        parse_args(&argv).command,
        Some(Commands::History {
            command: HistoryCommands::Show {
                id: "1718000000000".to_string()
            }
        })
    );
    assert_eq!(
        parse_args(&["coachroom", "history", "new"]).command,
        Some(Commands::History {
            command: HistoryCommands::New
        })
    );
}

#[test]
fn config_set_joins_value() {
    let args = parse_args(&["coachroom", "config", "set", "app-title", "My", "Coaches"]);
    assert_eq!(
        args.command,
        Some(Commands::Config {
            command: ConfigCommands::Set {
                key: "app-title".to_string(),
                value: vec!["My".to_string(), "Coaches".to_string()],
            }
        })
    );
}

#[test]
fn unknown_config_key_is_reported() {
    match parse_config_key("colour-scheme") {
        Err(ConfigError::UnknownKey(key)) => assert_eq!(key, "colour-scheme"),
        other => panic!("expected unknown key error, got {other:?}"),
    }
    assert!(parse_config_key("base-url").is_ok());
}
