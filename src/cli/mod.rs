mod users;

pub use users::UserCommands;

use clap::{Parser, Subcommand};

/// chat-relay - real-time chat relay server
#[derive(Parser)]
#[command(name = "chat-relay")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the server (default)
    Serve,

    /// User management commands
    #[command(subcommand)]
    User(UserCommands),

    /// Show recent messages
    History {
        /// Number of messages to show
        #[arg(short, long, default_value = "50")]
        limit: i64,

        /// Show private messages of this user ID instead of public ones
        #[arg(short, long)]
        user: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["chat-relay"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_history_args() {
        let cli = Cli::try_parse_from(["chat-relay", "history", "--limit", "5", "--user", "u1"]).unwrap();
        match cli.command {
            Some(Commands::History { limit, user }) => {
                assert_eq!(limit, 5);
                assert_eq!(user.as_deref(), Some("u1"));
            }
            _ => panic!("expected history command"),
        }
    }

    #[test]
    fn test_user_create_args() {
        let cli = Cli::try_parse_from([
            "chat-relay",
            "user",
            "create",
            "--username",
            "alice",
            "--email",
            "alice@example.com",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::User(UserCommands::Create { password: None, .. }))
        ));
    }
}
