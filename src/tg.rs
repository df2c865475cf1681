use std::{future::Future, str::FromStr, time::Duration};

use teloxide::{
    dispatching::{Dispatcher, UpdateFilterExt},
    prelude::*,
    types::{
        CallbackQuery, ChatId, ChosenInlineResult, InlineKeyboardButton, InlineKeyboardMarkup, InlineQuery,
        MessageId, MessageOrigin,
    },
    update_listeners::webhooks,
    utils::command::BotCommands,
    ApiError, RequestError,
};
use tracing::{debug, info, warn};

use crate::admin::{self, AdminCommand, ADMIN_HELP};
use crate::cache::InlineCache;
use crate::callback::{EpisodeVoice, Menu, Nav};
use crate::card;
use crate::config::WebhookConfig;
use crate::error::{Error, Result};
use crate::inline::{build_inline_results, InlineEntry, InlineSource, SEARCH_BUDGET};
use crate::keyboard::{
    close_button, close_keyboard, episode_nav_keyboard, initial_voice_filter, season_header, season_keyboard,
    series_keyboard, voice_prompt_keyboard, voice_prompt_text,
};
use crate::reconcile::Reconciler;
use crate::storage::Storage;
use crate::watch::{ItemKind, Season, StorageRef, WatchItem};

/// Общий дедлайн на обработку одного апдейта.
pub const UPDATE_DEADLINE: Duration = Duration::from_secs(9);
const PART_PACING: Duration = Duration::from_millis(250);
const INLINE_CACHE_OK: u32 = 5;
const INLINE_CACHE_FAILED: u32 = 1;

const START_TEXT: &str = "Это библиотека кино и сериалов с быстрым поиском.\n\nНажми “Поиск” и введи название — я покажу карточки.";
const SEARCH_HINT: &str = "Открой поиск и набери название — я покажу карточки.\n\nПодсказка: можно нажать кнопку “Поиск” в меню.";
const NOT_IN_TELEGRAM: &str = "Нет в Telegram";

/* ====== Зависимости обработчиков ====== */
#[derive(Clone)]
pub struct App {
    pub storage: Storage,
    pub reconciler: Reconciler,
    pub cache: InlineCache,
    pub admin_chat_id: Option<i64>,
}

/* ====== Команды ====== */
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Команды:")]
enum Command {
    /// меню; `/start get_<id>` сразу открывает карточку
    #[command(description = "меню")]
    Start(String),
    #[command(description = "карточка по kp_id")]
    Get(String),
    #[command(description = "помощь")]
    Help,
}

pub async fn run(bot: Bot, app: App, webhook: Option<WebhookConfig>) -> anyhow::Result<()> {
    let handler = dptree::entry()
        .branch(
            Update::filter_message()
                .branch(
                    dptree::entry()
                        .filter_command::<Command>()
                        .endpoint({
                            let app = app.clone();
                            move |bot: Bot, msg: Message, cmd: Command| {
                                let app = app.clone();
                                async move { within_deadline("command", on_command(bot, msg, cmd, &app)).await }
                            }
                        }),
                )
                .branch({
                    let app = app.clone();
                    dptree::endpoint(move |bot: Bot, msg: Message| {
                        let app = app.clone();
                        async move { within_deadline("admin", on_admin_message(bot, msg, &app)).await }
                    })
                }),
        )
        .branch(Update::filter_inline_query().endpoint({
            let app = app.clone();
            move |bot: Bot, q: InlineQuery| {
                let app = app.clone();
                async move { within_deadline("inline_query", on_inline_query(bot, q, &app)).await }
            }
        }))
        .branch(Update::filter_chosen_inline_result().endpoint({
            let app = app.clone();
            move |bot: Bot, chosen: ChosenInlineResult| {
                let app = app.clone();
                async move { within_deadline("chosen_inline_result", on_chosen_inline(bot, chosen, &app)).await }
            }
        }))
        .branch(Update::filter_callback_query().endpoint({
            let app = app.clone();
            move |bot: Bot, q: CallbackQuery| {
                let app = app.clone();
                async move { within_deadline("callback", on_callback(bot, q, &app)).await }
            }
        }));

    let mut dispatcher = Dispatcher::builder(bot.clone(), handler)
        .enable_ctrlc_handler()
        .build();

    match webhook {
        Some(wh) => {
            info!(url = %wh.url, addr = %wh.addr, "starting in webhook mode");
            let listener = webhooks::axum(bot, webhooks::Options::new(wh.addr, wh.url)).await?;
            dispatcher
                .dispatch_with_listener(listener, LoggingErrorHandler::with_custom_text("update listener error"))
                .await;
        }
        None => {
            info!("starting in polling mode");
            dispatcher.dispatch().await;
        }
    }
    Ok(())
}

/// Дедлайн + логирование; наружу ошибка не уходит, Telegram получает 200.
async fn within_deadline<F>(op: &'static str, fut: F) -> ResponseResult<()>
where
    F: Future<Output = Result<()>>,
{
    match tokio::time::timeout(UPDATE_DEADLINE, fut).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) if e.is_absorbed() => debug!(op, error = %e, "absorbed"),
        Ok(Err(e)) => warn!(op, error = %e, "handler failed"),
        Err(_) => warn!(op, "deadline exceeded, remaining calls abandoned"),
    }
    Ok(())
}

/* ====== Публичные команды ====== */
async fn on_command(bot: Bot, msg: Message, cmd: Command, app: &App) -> Result<()> {
    let chat = msg.chat.id;
    match cmd {
        Command::Start(payload) => {
            debug!(chat_id = chat.0, payload = %payload, "/start");
            if let Some(id) = deep_link_id(&payload) {
                return send_card(&bot, chat, app, id).await;
            }
            bot.send_message(chat, START_TEXT).reply_markup(start_keyboard()).await?;
        }
        Command::Get(arg) => {
            let Some(id) = parse_id(&arg) else { return Ok(()) };
            send_card(&bot, chat, app, id).await?;
        }
        Command::Help => {
            let reply = admin::help_denied(app.admin_chat_id, chat.0).unwrap_or_else(|| ADMIN_HELP.to_string());
            bot.send_message(chat, reply).await?;
        }
    }
    Ok(())
}

fn parse_id(raw: &str) -> Option<u64> {
    raw.split_whitespace().next()?.parse::<u64>().ok().filter(|&id| id > 0)
}

/// `get_<id>` из ссылки `t.me/<bot>?start=get_<id>`.
fn deep_link_id(payload: &str) -> Option<u64> {
    parse_id(payload.trim().strip_prefix("get_")?)
}

fn start_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![
            InlineKeyboardButton::callback("Фильмы", Nav::Menu(Menu::Movies).to_string()),
            InlineKeyboardButton::callback("Сериалы", Nav::Menu(Menu::Series).to_string()),
        ],
        vec![InlineKeyboardButton::switch_inline_query_current_chat("Поиск", "")],
        vec![close_button()],
    ])
}

async fn send_card(bot: &Bot, chat: ChatId, app: &App, id: u64) -> Result<()> {
    let c = card::load(&app.reconciler, &app.storage, id).await?;
    card::send(bot, chat, &c).await
}

/* ====== Команды оператора ====== */
async fn on_admin_message(bot: Bot, msg: Message, app: &App) -> Result<()> {
    let Some(admin) = app.admin_chat_id else { return Ok(()) };
    if msg.chat.id.0 != admin {
        return Ok(());
    }
    let Some(text) = msg.text() else { return Ok(()) };
    let cmd = match AdminCommand::parse(text) {
        None => return Ok(()),
        Some(Err(e)) => {
            bot.send_message(msg.chat.id, e.to_string()).await?;
            return Ok(());
        }
        Some(Ok(cmd)) => cmd,
    };
    debug!(?cmd, "admin command");
    let reply = admin::execute(&app.storage, cmd, forwarded_ref(&msg)).await;
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

/// Пост канала-хранилища, на пересылку которого ответил оператор.
fn forwarded_ref(msg: &Message) -> Option<StorageRef> {
    match msg.reply_to_message()?.forward_origin()? {
        MessageOrigin::Channel { chat, message_id, .. } => Some(StorageRef {
            chat_id: chat.id.0,
            message_id: message_id.0,
        }),
        _ => None,
    }
}

/* ====== Инлайн-режим ====== */
async fn on_inline_query(bot: Bot, q: InlineQuery, app: &App) -> Result<()> {
    let source = InlineSource::from_query(&q.query);
    let client = app.reconciler.client();
    let movies = match tokio::time::timeout(SEARCH_BUDGET, source.fetch(client)).await {
        Ok(Ok(movies)) => movies,
        Ok(Err(e)) => {
            warn!(query = %q.query, error = %e, "inline search failed");
            return answer_inline_empty(&bot, q).await;
        }
        Err(_) => {
            warn!(query = %q.query, "inline search exceeded its budget");
            return answer_inline_empty(&bot, q).await;
        }
    };

    let results: Vec<_> = build_inline_results(client, &app.cache, &movies)
        .await
        .into_iter()
        .map(InlineEntry::into_result)
        .collect();
    debug!(query = %q.query, results = results.len(), "inline answer");
    bot.answer_inline_query(q.id, results)
        .cache_time(INLINE_CACHE_OK)
        .is_personal(true)
        .await?;
    Ok(())
}

async fn answer_inline_empty(bot: &Bot, q: InlineQuery) -> Result<()> {
    bot.answer_inline_query(q.id, Vec::new()).cache_time(INLINE_CACHE_FAILED).await?;
    Ok(())
}

async fn on_chosen_inline(bot: Bot, chosen: ChosenInlineResult, app: &App) -> Result<()> {
    let Some(id) = parse_id(&chosen.result_id) else {
        return Err(Error::NotFound(format!("inline result {:?}", chosen.result_id)));
    };
    let c = card::load(&app.reconciler, &app.storage, id).await?;
    match chosen.inline_message_id.as_deref() {
        Some(inline_id) => card::edit_inline(&bot, inline_id, &c).await,
        None => card::send(&bot, chosen.from.id, &c).await,
    }
}

/* ====== Callback-кнопки ======
   close, menu:*, watch, season, seasonpage, seasonvoice, ep, epnav, epv;
   формат токенов в callback.rs */

/// Где висела нажатая кнопка.
enum Origin {
    Chat(ChatId, MessageId),
    Inline(String),
    Unknown,
}

impl Origin {
    fn of(q: &CallbackQuery) -> Self {
        if let Some(m) = &q.message {
            return Origin::Chat(m.chat().id, m.id());
        }
        match &q.inline_message_id {
            Some(id) => Origin::Inline(id.clone()),
            None => Origin::Unknown,
        }
    }
}

async fn on_callback(bot: Bot, q: CallbackQuery, app: &App) -> Result<()> {
    let Some(data) = q.data.as_deref() else {
        return answer_cb(&bot, &q, None).await;
    };
    let nav = match Nav::from_str(data) {
        Ok(nav) => nav,
        Err(e) => {
            answer_cb(&bot, &q, None).await?;
            return Err(e);
        }
    };

    // отвечаем до копирования: пересылка частей фильма может упереться в дедлайн
    let in_library = match nav.item_id() {
        Some(id) => app.storage.get(id).await.is_some(),
        None => true,
    };
    answer_cb(&bot, &q, callback_notice(&nav, in_library)).await?;

    route(&bot, &q, app, &nav).await.map_err(|e| {
        if e.is_absorbed() {
            debug!(token = data, item = ?nav.item_id(), "callback target missing");
        }
        e
    })
}

fn callback_notice(nav: &Nav, in_library: bool) -> Option<&'static str> {
    match nav {
        Nav::Watch { .. } if !in_library => Some(NOT_IN_TELEGRAM),
        _ => None,
    }
}

async fn route(bot: &Bot, q: &CallbackQuery, app: &App, nav: &Nav) -> Result<()> {
    let origin = Origin::of(q);
    // из инлайн-сообщения копии уходят в личку
    let target = q.message.as_ref().map(|m| m.chat().id).unwrap_or_else(|| ChatId::from(q.from.id));

    match nav {
        Nav::Close => close(bot, &origin).await,
        Nav::Menu(menu) => {
            let (text, preset) = match menu {
                Menu::Movies => ("Топ фильмов. Нажми кнопку ниже.", Some("#movies")),
                Menu::Series => ("Топ сериалов. Нажми кнопку ниже.", Some("#tv")),
                Menu::New => (SEARCH_HINT, None),
            };
            let req = bot.send_message(target, text);
            match preset {
                Some(p) => {
                    let kb = InlineKeyboardMarkup::new(vec![vec![
                        InlineKeyboardButton::switch_inline_query_current_chat("Показать", p),
                    ]]);
                    req.reply_markup(kb).await?;
                }
                None => {
                    req.await?;
                }
            }
            Ok(())
        }
        Nav::Watch { id } => {
            let item = library_item(app, *id).await?;
            match item.kind {
                ItemKind::Movie => replay_movie(bot, target, &item).await,
                ItemKind::Series => {
                    bot.send_message(target, item.display_title())
                        .reply_markup(series_keyboard(&item))
                        .await?;
                    Ok(())
                }
            }
        }
        Nav::Season { id, season } => {
            let item = library_item(app, *id).await?;
            let s = find_season(&item, *season)?;
            let filter = initial_voice_filter(&item, s);
            let kb = season_keyboard(&item, s, 1, filter.as_deref());
            edit_text(bot, &origin, season_header(&item, *season), kb).await
        }
        Nav::SeasonPage { id, season, page, voice } => {
            let item = library_item(app, *id).await?;
            let s = find_season(&item, *season)?;
            edit_markup(bot, &origin, season_keyboard(&item, s, *page, voice.as_deref())).await
        }
        Nav::SeasonVoice { id, season, voice } => {
            let item = library_item(app, *id).await?;
            let s = find_season(&item, *season)?;
            edit_markup(bot, &origin, season_keyboard(&item, s, 1, voice.as_deref())).await
        }
        Nav::Episode { id, season, episode, voice } => {
            let item = library_item(app, *id).await?;
            let prompt = matches!(voice, EpisodeVoice::Select);
            // пустая метка в `ep:` значит «любая», а не «без названия»
            let wanted = voice.as_filter().map(str::trim).filter(|v| !v.is_empty());
            play_episode(bot, target, &item, *season, *episode, wanted, prompt).await
        }
        Nav::EpisodeVoice { id, season, episode, voice } => {
            let item = library_item(app, *id).await?;
            play_episode(bot, target, &item, *season, *episode, Some(voice.as_str()), false).await
        }
        Nav::EpisodeNav { id, season, episode, step } => {
            let item = library_item(app, *id).await?;
            let s = find_season(&item, *season)?;
            let (index, _) = s
                .episode(*episode)
                .ok_or_else(|| Error::NotFound(format!("kp_id {id} S{season}E{episode}")))?;
            let next = step
                .apply(index)
                .and_then(|i| s.episodes.get(i))
                .ok_or_else(|| Error::NotFound(format!("kp_id {id} S{season}: no neighbour of E{episode}")))?;
            play_episode(bot, target, &item, *season, next.number, None, false).await?;
            if let Origin::Chat(chat, mid) = origin {
                if let Err(e) = bot.delete_message(chat, mid).await {
                    debug!(error = %e, "could not delete previous episode");
                }
            }
            Ok(())
        }
    }
}

async fn library_item(app: &App, id: u64) -> Result<WatchItem> {
    app.storage
        .get(id)
        .await
        .ok_or_else(|| Error::NotFound(format!("kp_id {id} is not in the library")))
}

fn find_season(item: &WatchItem, season: u32) -> Result<&Season> {
    item.season(season)
        .ok_or_else(|| Error::NotFound(format!("kp_id {} season {season}", item.kp_id)))
}

/// Фильм: все части по порядку, пауза между копиями, «Закрыть» на последней.
async fn replay_movie(bot: &Bot, chat: ChatId, item: &WatchItem) -> Result<()> {
    let from = ChatId(item.storage_chat_id);
    let mut last = None;
    let mut failed = Vec::new();
    for (i, mid) in item.movie_message_ids().into_iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(PART_PACING).await;
        }
        match bot.copy_message(chat, from, MessageId(mid)).await {
            Ok(copied) => {
                debug!(kp_id = item.kp_id, mid, new_id = copied.0, "movie part copied");
                last = Some(copied);
            }
            Err(e) => {
                warn!(kp_id = item.kp_id, mid, error = %e, "movie part copy failed");
                failed.push(mid);
            }
        }
    }
    if let Some(last) = last {
        edit_markup(bot, &Origin::Chat(chat, last), close_keyboard()).await?;
    }
    if !failed.is_empty() {
        let ids: Vec<String> = failed.iter().map(ToString::to_string).collect();
        bot.send_message(chat, format!("Не удалось скопировать части: {}", ids.join(",")))
            .await?;
    }
    Ok(())
}

/// Эпизод: копия выбранного варианта с навигацией. Если вариантов несколько,
/// а озвучка не выбрана (или `prompt`), показывается выбор озвучки.
/// `Some("")`: вариант без названия озвучки.
async fn play_episode(
    bot: &Bot,
    chat: ChatId,
    item: &WatchItem,
    season: u32,
    episode: u32,
    voice: Option<&str>,
    prompt: bool,
) -> Result<()> {
    let s = find_season(item, season)?;
    let (index, ep) = s
        .episode(episode)
        .ok_or_else(|| Error::NotFound(format!("kp_id {} S{season}E{episode}", item.kp_id)))?;

    if prompt || (voice.is_none() && ep.variants.len() > 1) {
        bot.send_message(chat, voice_prompt_text(season, episode))
            .reply_markup(voice_prompt_keyboard(item.kp_id, season, ep))
            .await?;
        return Ok(());
    }

    let filter = voice.map(|v| s.voice_filter(v));
    let r = ep
        .pick_ref(filter.as_ref())
        .ok_or_else(|| Error::NotFound(format!("kp_id {} S{season}E{episode}: no rendition", item.kp_id)))?;
    let copied = bot
        .copy_message(chat, ChatId(r.chat_id), MessageId(r.message_id))
        .reply_markup(episode_nav_keyboard(item.kp_id, s, index))
        .await?;
    debug!(kp_id = item.kp_id, season, episode, voice = ?voice, new_id = copied.0, "episode copied");
    Ok(())
}

async fn close(bot: &Bot, origin: &Origin) -> Result<()> {
    match origin {
        Origin::Chat(chat, mid) => {
            bot.delete_message(*chat, *mid).await?;
            Ok(())
        }
        Origin::Inline(_) => edit_markup(bot, origin, InlineKeyboardMarkup::default()).await,
        Origin::Unknown => Ok(()),
    }
}

async fn edit_text(bot: &Bot, origin: &Origin, text: String, kb: InlineKeyboardMarkup) -> Result<()> {
    let res = match origin {
        Origin::Chat(chat, mid) => bot.edit_message_text(*chat, *mid, text).reply_markup(kb).await.map(|_| ()),
        Origin::Inline(id) => bot.edit_message_text_inline(id, text).reply_markup(kb).await.map(|_| ()),
        Origin::Unknown => return Ok(()),
    };
    not_modified_ok(res)
}

async fn edit_markup(bot: &Bot, origin: &Origin, kb: InlineKeyboardMarkup) -> Result<()> {
    let res = match origin {
        Origin::Chat(chat, mid) => bot.edit_message_reply_markup(*chat, *mid).reply_markup(kb).await.map(|_| ()),
        Origin::Inline(id) => bot.edit_message_reply_markup_inline(id).reply_markup(kb).await.map(|_| ()),
        Origin::Unknown => return Ok(()),
    };
    not_modified_ok(res)
}

/// Повторное нажатие той же кнопки не ошибка.
fn not_modified_ok(res: std::result::Result<(), RequestError>) -> Result<()> {
    match res {
        Err(RequestError::Api(ApiError::MessageNotModified)) => Ok(()),
        other => Ok(other?),
    }
}

async fn answer_cb(bot: &Bot, q: &CallbackQuery, text: Option<&str>) -> Result<()> {
    let mut req = bot.answer_callback_query(q.id.clone());
    if let Some(text) = text {
        req = req.text(text).show_alert(false);
    }
    req.await?;
    Ok(())
}
