use clap::Subcommand;
use rand::Rng;

use crate::auth::hash_password;
use crate::storage::{CreateUser, UserFilter, UserStore};

/// User management subcommands
#[derive(Subcommand)]
pub enum UserCommands {
    /// Create a new user
    Create {
        /// Display name shown in chat
        #[arg(short, long)]
        username: String,

        /// User's email address (login)
        #[arg(short, long)]
        email: String,

        /// Password (if not provided, a random one will be generated)
        #[arg(short, long)]
        password: Option<String>,
    },

    /// List all users
    List,

    /// Show user details
    Show {
        /// User's email address
        email: String,
    },

    /// Delete a user
    Delete {
        /// User's email address
        #[arg(short, long)]
        email: String,

        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
}

impl UserCommands {
    /// Execute the user command
    pub async fn execute(self, user_store: &dyn UserStore) -> Result<(), Box<dyn std::error::Error>> {
        match self {
            UserCommands::Create {
                username,
                email,
                password,
            } => {
                let password = password.unwrap_or_else(generate_secure_password);
                let password_hash =
                    hash_password(&password).map_err(|e| format!("Failed to hash password: {}", e))?;

                let user = user_store
                    .create_user(CreateUser {
                        username,
                        email: email.trim().to_lowercase(),
                        password_hash,
                    })
                    .await?;

                println!("✅ User created successfully!");
                println!();
                println!("   ID:       {}", user.id);
                println!("   Username: {}", user.username);
                println!("   Email:    {}", user.email);
                println!("   Password: {}", password);
                println!();
                println!("⚠️  Please securely share these credentials with the user.");
            }

            UserCommands::List => {
                let users = user_store.find_users(UserFilter::All).await?;

                if users.is_empty() {
                    println!("No users found.");
                    return Ok(());
                }

                println!(
                    "{:<36} {:<20} {:<30} {:<8} {:<20}",
                    "ID", "Username", "Email", "Online", "Last Seen"
                );
                println!("{}", "-".repeat(118));

                for user in users {
                    println!(
                        "{:<36} {:<20} {:<30} {:<8} {:<20}",
                        user.id,
                        truncate(&user.username, 18),
                        truncate(&user.email, 28),
                        if user.is_online { "Yes" } else { "No" },
                        user.last_seen
                            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                            .unwrap_or_else(|| "-".to_string())
                    );
                }
            }

            UserCommands::Show { email } => {
                let user = user_store.get_user_by_email(&email.trim().to_lowercase()).await?;

                println!("User Details:");
                println!("  ID:        {}", user.id);
                println!("  Username:  {}", user.username);
                println!("  Email:     {}", user.email);
                println!("  Online:    {}", if user.is_online { "Yes" } else { "No" });
                println!("  Created:   {}", user.created_at);
                println!(
                    "  Last Seen: {}",
                    user.last_seen
                        .map(|t| t.to_string())
                        .unwrap_or_else(|| "Never".to_string())
                );
            }

            UserCommands::Delete { email, force } => {
                let user = user_store.get_user_by_email(&email.trim().to_lowercase()).await?;

                if !force {
                    println!("Are you sure you want to delete user {}? (y/N)", email);
                    let mut input = String::new();
                    std::io::stdin().read_line(&mut input)?;
                    if !input.trim().eq_ignore_ascii_case("y") {
                        println!("Cancelled.");
                        return Ok(());
                    }
                }

                user_store.delete_user(&user.id).await?;
                println!("✅ User {} has been deleted.", email);
            }
        }

        Ok(())
    }
}

/// Generate a secure random password
fn generate_secure_password() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghjkmnpqrstuvwxyz23456789!@#$%&*";
    let mut rng = rand::thread_rng();

    (0..16)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

/// Truncate string to max length with ellipsis
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a-very-long-username", 10), "a-very-...");
    }

    #[test]
    fn test_generated_password_is_usable() {
        let password = generate_secure_password();
        assert_eq!(password.chars().count(), 16);
        assert!(hash_password(&password).is_ok());
    }

    #[tokio::test]
    async fn test_create_then_delete() {
        let store = MemoryStore::new();

        UserCommands::Create {
            username: "alice".to_string(),
            email: "Alice@Example.com".to_string(),
            password: Some("hunter22".to_string()),
        }
        .execute(&store)
        .await
        .unwrap();

        let user = store.get_user_by_email("alice@example.com").await.unwrap();
        assert_eq!(user.username, "alice");

        UserCommands::Delete {
            email: "alice@example.com".to_string(),
            force: true,
        }
        .execute(&store)
        .await
        .unwrap();

        assert!(store.get_user_by_email("alice@example.com").await.is_err());
    }
}
