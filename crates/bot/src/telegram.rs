//! Telegram delivery of rendered messages.

use async_trait::async_trait;
use domain::{ChatId, Keyboard, MessageRef, Notifier, NotifyError, RenderRequest};
use teloxide::prelude::*;
use teloxide::types::{
    FileId, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, MessageId, ParseMode,
};
use teloxide::{ApiError, RequestError};

/// Sends and edits messages through the Bot API.
///
/// Messages with an image go out as photos with an HTML caption, everything
/// else as HTML text.
#[derive(Clone)]
pub struct TelegramNotifier {
    bot: Bot,
}

impl TelegramNotifier {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    pub fn bot(&self) -> &Bot {
        &self.bot
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, chat: ChatId, message: RenderRequest) -> Result<MessageRef, NotifyError> {
        let chat_id = teloxide::types::ChatId(chat.0);
        let markup = keyboard_markup(&message.keyboard);

        let sent = match message.image {
            Some(file_id) => {
                let mut request = self
                    .bot
                    .send_photo(chat_id, InputFile::file_id(FileId(file_id)))
                    .caption(message.text)
                    .parse_mode(ParseMode::Html);
                if let Some(markup) = markup {
                    request = request.reply_markup(markup);
                }
                request.await
            }
            None => {
                let mut request = self
                    .bot
                    .send_message(chat_id, message.text)
                    .parse_mode(ParseMode::Html);
                if let Some(markup) = markup {
                    request = request.reply_markup(markup);
                }
                request.await
            }
        };

        match sent {
            Ok(sent) => Ok(MessageRef::new(chat, sent.id.0)),
            Err(e) => Err(classify(e, chat, None)),
        }
    }

    async fn edit(&self, target: MessageRef, message: RenderRequest) -> Result<(), NotifyError> {
        let chat_id = teloxide::types::ChatId(target.chat.0);
        let message_id = MessageId(target.message_id);
        // An empty keyboard clears the controls of the edited message.
        let markup =
            keyboard_markup(&message.keyboard).unwrap_or_else(InlineKeyboardMarkup::default);

        let edited = if message.image.is_some() {
            self.bot
                .edit_message_caption(chat_id, message_id)
                .caption(message.text)
                .parse_mode(ParseMode::Html)
                .reply_markup(markup)
                .await
        } else {
            self.bot
                .edit_message_text(chat_id, message_id, message.text)
                .parse_mode(ParseMode::Html)
                .reply_markup(markup)
                .await
        };

        match edited {
            Ok(_) => Ok(()),
            Err(RequestError::Api(ApiError::MessageNotModified)) => Ok(()),
            Err(e) => Err(classify(e, target.chat, Some(target.message_id))),
        }
    }
}

/// Converts a keyboard to its wire form. Empty keyboards have none.
pub fn keyboard_markup(keyboard: &Keyboard) -> Option<InlineKeyboardMarkup> {
    if keyboard.is_empty() {
        return None;
    }
    let rows = keyboard.rows.iter().map(|row| {
        row.iter()
            .map(|button| {
                InlineKeyboardButton::callback(button.label.clone(), button.action.to_string())
            })
            .collect::<Vec<_>>()
    });
    Some(InlineKeyboardMarkup::new(rows))
}

fn classify(err: RequestError, chat: ChatId, message_id: Option<i32>) -> NotifyError {
    match (&err, message_id) {
        (
            RequestError::Api(
                ApiError::BotBlocked
                | ApiError::ChatNotFound
                | ApiError::UserDeactivated
                | ApiError::BotKicked
                | ApiError::BotKickedFromSupergroup,
            ),
            _,
        ) => NotifyError::Unreachable(chat),
        (
            RequestError::Api(
                ApiError::MessageToEditNotFound
                | ApiError::MessageCantBeEdited
                | ApiError::MessageIdInvalid,
            ),
            Some(message_id),
        ) => NotifyError::NotEditable { chat, message_id },
        _ => NotifyError::Transport(err.to_string()),
    }
}
