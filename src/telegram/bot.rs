//! Bot initialization and command registration
//!
//! This module contains:
//! - Command enum definition
//! - Bot instance creation

use reqwest::ClientBuilder;
use teloxide::prelude::*;
use teloxide::types::BotCommand;
use teloxide::utils::command::BotCommands;

use crate::core::config;

/// Bot commands enum with descriptions
#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "start the bot")]
    Start,
    #[command(description = "how to use the bot")]
    Help,
    #[command(description = "change interface language")]
    Language,
    #[command(description = "set default quality")]
    Quality,
    #[command(description = "your recent downloads")]
    History,
    #[command(description = "your statistics")]
    Mystats,
    #[command(description = "cancel active downloads")]
    Cancel,
    #[command(description = "how to upload cookies")]
    Cookie,
    #[command(description = "list stored cookies")]
    Listcookies,
    #[command(description = "delete cookies for a platform")]
    Deletecookie(String),
    #[command(description = "bot statistics (admins)")]
    Stats,
    #[command(description = "ban a user (admins)")]
    Ban(String),
    #[command(description = "unban a user (admins)")]
    Unban(String),
    #[command(description = "remove old temporary files (admins)")]
    Cleanup,
    #[command(description = "grant VIP status (owner)")]
    Setvip(String),
}

/// Creates a Bot instance with custom or default API URL
///
/// # Returns
/// * `Ok(Bot)` - Successfully created bot instance
/// * `Err(anyhow::Error)` - Failed to create bot (invalid URL, bad HTTP client)
pub fn create_bot() -> anyhow::Result<Bot> {
    let client = ClientBuilder::new().timeout(config::network::timeout()).build()?;
    let bot = Bot::with_client(config::BOT_TOKEN.as_str(), client);

    // Check if local Bot API server is configured
    let bot = match config::BOT_API_URL.as_deref() {
        Some(bot_api_url) => {
            log::info!("Using custom Bot API URL: {}", bot_api_url);
            let url = url::Url::parse(bot_api_url).map_err(|e| anyhow::anyhow!("Invalid BOT_API_URL: {}", e))?;
            bot.set_api_url(url)
        }
        None => bot,
    };

    Ok(bot)
}

/// Commands shown in the Telegram menu. Admin and owner commands stay hidden.
pub fn public_commands() -> Vec<BotCommand> {
    vec![
        BotCommand::new("start", "start the bot"),
        BotCommand::new("help", "how to use the bot"),
        BotCommand::new("language", "change interface language"),
        BotCommand::new("quality", "set default quality"),
        BotCommand::new("history", "your recent downloads"),
        BotCommand::new("mystats", "your statistics"),
        BotCommand::new("cancel", "cancel active downloads"),
        BotCommand::new("cookie", "how to upload cookies"),
        BotCommand::new("listcookies", "list stored cookies"),
        BotCommand::new("deletecookie", "delete cookies for a platform"),
    ]
}

/// Sets up bot commands in Telegram UI
pub async fn setup_bot_commands(bot: &Bot) -> Result<(), teloxide::RequestError> {
    bot.set_my_commands(public_commands()).await?;
    Ok(())
}
