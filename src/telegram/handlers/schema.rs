//! Dispatcher schema and handler chain builders

use teloxide::dispatching::{UpdateFilterExt, UpdateHandler};
use teloxide::prelude::*;
use teloxide::types::Message;

use super::admin::{handle_ban, handle_cleanup, handle_setvip, handle_stats, handle_unban};
use super::callbacks::handle_callback;
use super::commands::{
    handle_cancel, handle_cookie, handle_deletecookie, handle_help, handle_history, handle_language,
    handle_listcookies, handle_mystats, handle_quality, handle_start,
};
use super::documents::{handle_cookie_document, IncomingDocument};
use super::downloads::handle_url_message;
use super::types::{Caller, HandlerDeps, HandlerError, UserInfo};
use crate::i18n;
use crate::telegram::bot::Command;
use crate::telegram::guards::GuardChain;

/// Creates the main dispatcher schema for the Telegram bot.
///
/// Every endpoint handles its own errors: they are logged and the user gets
/// the generic error message, so one failing update never stops the dispatcher.
pub fn schema(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    dptree::entry()
        .branch(command_handler(deps.clone()))
        .branch(document_handler(deps.clone()))
        .branch(message_handler(deps.clone()))
        .branch(callback_handler(deps))
}

/// Guards a command needs before its body runs.
pub fn command_guards(cmd: &Command) -> GuardChain {
    match cmd {
        Command::Stats | Command::Ban(_) | Command::Unban(_) | Command::Cleanup => GuardChain::admin(),
        Command::Setvip(_) => GuardChain::owner(),
        _ => GuardChain::user(),
    }
}

/// Runs a parsed command for `caller`.
pub async fn run_command(deps: &HandlerDeps, caller: &Caller, cmd: Command) -> Result<(), HandlerError> {
    if !caller.passes(deps, &command_guards(&cmd)).await {
        return Ok(());
    }

    match cmd {
        Command::Start => handle_start(deps, caller).await,
        Command::Help => handle_help(deps, caller).await,
        Command::Language => handle_language(deps, caller).await,
        Command::Quality => handle_quality(deps, caller).await,
        Command::History => handle_history(deps, caller).await,
        Command::Mystats => handle_mystats(deps, caller).await,
        Command::Cancel => handle_cancel(deps, caller).await,
        Command::Cookie => handle_cookie(deps, caller).await,
        Command::Listcookies => handle_listcookies(deps, caller).await,
        Command::Deletecookie(platform) => handle_deletecookie(deps, caller, &platform).await,
        Command::Stats => handle_stats(deps, caller).await,
        Command::Ban(args) => handle_ban(deps, caller, &args).await,
        Command::Unban(args) => handle_unban(deps, caller, &args).await,
        Command::Cleanup => handle_cleanup(deps, caller).await,
        Command::Setvip(args) => handle_setvip(deps, caller, &args).await,
    }
}

async fn report_failure(deps: &HandlerDeps, caller: &Caller, what: &str, err: HandlerError) {
    log::error!(
        "{} failed for user {} in chat {}: {}",
        what,
        caller.id(),
        caller.chat_id,
        err
    );
    deps.reply(caller.chat_id, &i18n::t(&caller.lang, "errors-generic"), None)
        .await;
}

/// Handler for bot commands (/start, /help, /stats, etc.)
fn command_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_message().branch(dptree::entry().filter_command::<Command>().endpoint(
        move |msg: Message, cmd: Command| {
            let deps = deps.clone();
            async move {
                let Some(info) = UserInfo::from_message(&msg) else {
                    return Ok(());
                };
                log::info!("Received command {:?} from user {} in chat {}", cmd, info.id, msg.chat.id);

                let caller = Caller::load(&deps, info, msg.chat.id.0);
                if let Err(e) = run_command(&deps, &caller, cmd).await {
                    report_failure(&deps, &caller, "Command", e).await;
                }
                Ok(())
            }
        },
    ))
}

/// Handler for uploaded documents (cookie exports)
fn document_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_message()
        .filter(|msg: Message| msg.document().is_some())
        .endpoint(move |msg: Message| {
            let deps = deps.clone();
            async move {
                let (Some(info), Some(document)) = (UserInfo::from_message(&msg), msg.document()) else {
                    return Ok(());
                };
                let caller = Caller::load(&deps, info, msg.chat.id.0);
                let doc = IncomingDocument::from_document(document);
                if let Err(e) = handle_cookie_document(&deps, &caller, &doc).await {
                    report_failure(&deps, &caller, "Cookie upload", e).await;
                }
                Ok(())
            }
        })
}

/// Handler for plain text: video links
fn message_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_message()
        .filter(|msg: Message| msg.text().is_some_and(|text| !text.starts_with('/')))
        .endpoint(move |msg: Message| {
            let deps = deps.clone();
            async move {
                let (Some(info), Some(text)) = (UserInfo::from_message(&msg), msg.text()) else {
                    return Ok(());
                };
                let caller = Caller::load(&deps, info, msg.chat.id.0);
                if let Err(e) = handle_url_message(&deps, &caller, text).await {
                    report_failure(&deps, &caller, "Link handling", e).await;
                }
                Ok(())
            }
        })
}

/// Handler for inline keyboard presses
fn callback_handler(deps: HandlerDeps) -> UpdateHandler<HandlerError> {
    Update::filter_callback_query().endpoint(move |bot: Bot, q: CallbackQuery| {
        let deps = deps.clone();
        async move {
            let info = UserInfo::from_user(&q.from);
            let (chat_id, message_id) = match q.message.as_ref() {
                Some(message) => (message.chat().id.0, message.id().0),
                None => (info.id, 0),
            };
            let caller = Caller::load(&deps, info, chat_id);
            let data = q.data.as_deref().unwrap_or_default();

            let toast = match handle_callback(&deps, &caller, message_id, data).await {
                Ok(toast) => toast,
                Err(e) => {
                    log::error!("Callback {:?} failed for user {}: {}", data, caller.id(), e);
                    Some(i18n::t(&caller.lang, "errors-generic"))
                }
            };

            let mut answer = bot.answer_callback_query(q.id.clone());
            if let Some(text) = toast {
                answer = answer.text(text);
            }
            if let Err(e) = answer.await {
                log::warn!("Failed to answer callback query of user {}: {}", caller.id(), e);
            }
            Ok(())
        }
    })
}
