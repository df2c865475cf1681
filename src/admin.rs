// Команды оператора библиотеки. Разбор без Telegram;
// ссылку на пересланный пост передаёт tg.rs.

use tracing::{info, warn};

use crate::storage::{Storage, LIST_DEFAULT};
use crate::watch::{StorageRef, WatchItem};

pub const ADMIN_HELP: &str = "/help

/addmovie <kp_id> <voice> <quality> <storage_chat_id> <storage_message_id[,storage_message_id...]>
/addmovie <kp_id> <voice> <quality>   (reply to forwarded channel post)
/addmoviepart <kp_id>   (reply to forwarded channel post, append part)

/addseries <kp_id> <title>

/addepisode <kp_id> <season> <episode> <voice> <quality> <storage_chat_id> <storage_message_id>
/addepisode <kp_id> <season> <episode> <voice> <quality>   (reply to forwarded channel post)

/delepisode <kp_id> <season> <episode>
/delseason <kp_id> <season>

/getinfo <kp_id>
/del <kp_id>
/list [limit]";

const USAGE_ADDMOVIE: &str = "Usage: /addmovie <kp_id> <voice> <quality> <storage_chat_id> <storage_message_id[,storage_message_id...]> OR reply to forwarded post: /addmovie <kp_id> <voice> <quality>";
const USAGE_ADDMOVIEPART: &str = "Usage: /addmoviepart <kp_id> (reply to forwarded post)";
const USAGE_ADDSERIES: &str = "Usage: /addseries <kp_id> <title>";
const USAGE_ADDEPISODE: &str = "Usage: /addepisode <kp_id> <season> <episode> <voice> <quality> <storage_chat_id> <storage_message_id> OR reply to forwarded post: /addepisode <kp_id> <season> <episode> <voice> <quality>";
const USAGE_GETINFO: &str = "Usage: /getinfo <kp_id>";
const USAGE_DELEPISODE: &str = "Usage: /delepisode <kp_id> <season> <episode>";
const USAGE_DELSEASON: &str = "Usage: /delseason <kp_id> <season>";
const USAGE_DEL: &str = "Usage: /del <kp_id>";

pub const OK: &str = "OK";
pub const NEED_FORWARD: &str = "Reply to a forwarded post from the storage channel.";

/// Отказ на /help для всех, кроме оператора.
pub fn help_denied(admin_chat_id: Option<i64>, chat_id: i64) -> Option<String> {
    match admin_chat_id {
        None => Some(format!("ADMIN_CHAT_ID не задан. Твой chat_id={chat_id}")),
        Some(admin) if admin != chat_id => Some(format!("Нет доступа. Твой chat_id={chat_id}")),
        Some(_) => None,
    }
}

/// Откуда брать ссылку на сообщение в канале-хранилище.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Refs<T> {
    Given(T),
    FromReply,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    AddMovie { id: u64, voice: String, quality: String, refs: Refs<(i64, Vec<i32>)> },
    AddMoviePart { id: u64 },
    AddSeries { id: u64, title: String },
    AddEpisode { id: u64, season: u32, episode: u32, voice: String, quality: String, refs: Refs<StorageRef> },
    GetInfo { id: u64 },
    DelEpisode { id: u64, season: u32, episode: u32 },
    DelSeason { id: u64, season: u32 },
    Del { id: u64 },
    List { limit: usize },
}

/// Ошибка разбора: её текст и есть ответ оператору.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("{0}")]
    Usage(&'static str),
    #[error("Invalid args")]
    InvalidArgs,
    #[error("Invalid kp_id")]
    InvalidId,
}

fn positive<T: std::str::FromStr + Default + PartialEq>(raw: &str) -> Option<T> {
    raw.parse::<T>().ok().filter(|v| *v != T::default())
}

/// `12,10, 11` → `[12, 10, 11]`; нули и мусор отбрасываются.
pub fn parse_message_ids(raw: &str) -> Vec<i32> {
    raw.split(',')
        .filter_map(|p| p.trim().parse::<i32>().ok())
        .filter(|&id| id > 0)
        .collect()
}

impl AdminCommand {
    /// `None`: это не команда оператора.
    pub fn parse(text: &str) -> Option<Result<Self, ParseError>> {
        let text = text.trim();
        let fields: Vec<&str> = text.split_whitespace().collect();
        let head = *fields.first()?;
        // /cmd@botname
        let name = head.split('@').next().unwrap_or(head);
        let cmd = match name {
            "/addmovie" => parse_addmovie(&fields),
            "/addmoviepart" => parse_one_id(&fields, USAGE_ADDMOVIEPART, |id| AdminCommand::AddMoviePart { id }, 2),
            "/addseries" => parse_addseries(text, &fields),
            "/addepisode" => parse_addepisode(&fields),
            "/getinfo" => parse_one_id(&fields, USAGE_GETINFO, |id| AdminCommand::GetInfo { id }, 0),
            "/delepisode" => parse_delepisode(&fields),
            "/delseason" => parse_delseason(&fields),
            "/del" => parse_one_id(&fields, USAGE_DEL, |id| AdminCommand::Del { id }, 0),
            "/list" => Ok(AdminCommand::List {
                limit: fields.get(1).and_then(|n| n.parse().ok()).unwrap_or(LIST_DEFAULT),
            }),
            _ => return None,
        };
        Some(cmd)
    }
}

/// `exact`: точное число полей (0: не меньше двух).
fn parse_one_id(
    fields: &[&str],
    usage: &'static str,
    make: impl Fn(u64) -> AdminCommand,
    exact: usize,
) -> Result<AdminCommand, ParseError> {
    let bad_arity = if exact > 0 { fields.len() != exact } else { fields.len() < 2 };
    if bad_arity {
        return Err(ParseError::Usage(usage));
    }
    positive(fields[1]).map(make).ok_or(ParseError::InvalidId)
}

fn parse_addmovie(f: &[&str]) -> Result<AdminCommand, ParseError> {
    if f.len() != 4 && f.len() != 6 {
        return Err(ParseError::Usage(USAGE_ADDMOVIE));
    }
    let id = positive(f[1]).ok_or(ParseError::InvalidArgs)?;
    let refs = if f.len() == 6 {
        let chat: i64 = f[4].parse().ok().filter(|&c| c != 0).ok_or(ParseError::InvalidArgs)?;
        let ids = parse_message_ids(f[5]);
        if ids.is_empty() {
            return Err(ParseError::InvalidArgs);
        }
        Refs::Given((chat, ids))
    } else {
        Refs::FromReply
    };
    Ok(AdminCommand::AddMovie { id, voice: f[2].to_string(), quality: f[3].to_string(), refs })
}

fn parse_addseries(text: &str, f: &[&str]) -> Result<AdminCommand, ParseError> {
    if f.len() < 3 {
        return Err(ParseError::Usage(USAGE_ADDSERIES));
    }
    let id = positive(f[1]).ok_or(ParseError::InvalidArgs)?;
    // название: весь остаток строки после id, с пробелами
    let rest = text.trim_start_matches(f[0]).trim_start();
    let title = rest.strip_prefix(f[1]).unwrap_or(rest).trim();
    if title.is_empty() {
        return Err(ParseError::InvalidArgs);
    }
    Ok(AdminCommand::AddSeries { id, title: title.to_string() })
}

fn parse_addepisode(f: &[&str]) -> Result<AdminCommand, ParseError> {
    if f.len() != 6 && f.len() != 8 {
        return Err(ParseError::Usage(USAGE_ADDEPISODE));
    }
    let (Some(id), Some(season), Some(episode)) = (positive(f[1]), positive(f[2]), positive(f[3])) else {
        return Err(ParseError::InvalidArgs);
    };
    let refs = if f.len() == 8 {
        let chat_id: i64 = f[6].parse().ok().filter(|&c| c != 0).ok_or(ParseError::InvalidArgs)?;
        let message_id: i32 = f[7].parse().ok().filter(|&m| m > 0).ok_or(ParseError::InvalidArgs)?;
        Refs::Given(StorageRef { chat_id, message_id })
    } else {
        Refs::FromReply
    };
    Ok(AdminCommand::AddEpisode {
        id,
        season,
        episode,
        voice: f[4].to_string(),
        quality: f[5].to_string(),
        refs,
    })
}

fn parse_delepisode(f: &[&str]) -> Result<AdminCommand, ParseError> {
    if f.len() < 4 {
        return Err(ParseError::Usage(USAGE_DELEPISODE));
    }
    match (positive(f[1]), positive(f[2]), positive(f[3])) {
        (Some(id), Some(season), Some(episode)) => Ok(AdminCommand::DelEpisode { id, season, episode }),
        _ => Err(ParseError::InvalidArgs),
    }
}

fn parse_delseason(f: &[&str]) -> Result<AdminCommand, ParseError> {
    if f.len() < 3 {
        return Err(ParseError::Usage(USAGE_DELSEASON));
    }
    match (positive(f[1]), positive(f[2])) {
        (Some(id), Some(season)) => Ok(AdminCommand::DelSeason { id, season }),
        _ => Err(ParseError::InvalidArgs),
    }
}

pub fn info_text(item: &WatchItem) -> String {
    let ids = item.movie_message_ids();
    let msg_ref = if ids.is_empty() {
        format!("{}:{}", item.storage_chat_id, item.storage_message_id)
    } else {
        let ids: Vec<String> = ids.iter().map(i32::to_string).collect();
        format!("{}:{}", item.storage_chat_id, ids.join(","))
    };
    format!(
        "kp_id={}\ntype={}\ntitle={}\nmovie_ref={}\nseasons={}",
        item.kp_id,
        item.kind.as_str(),
        item.title,
        msg_ref,
        item.seasons.len()
    )
}

pub fn list_text(items: &[WatchItem]) -> String {
    if items.is_empty() {
        return "Empty".to_string();
    }
    items
        .iter()
        .map(|it| format!("{} {} {}", it.kp_id, it.kind.as_str(), it.display_title()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn write_reply(op: &str, id: u64, res: crate::error::Result<()>) -> String {
    match res {
        Ok(()) => {
            info!(op, kp_id = id, "library updated");
            OK.to_string()
        }
        Err(e) => {
            if e.is_absorbed() {
                warn!(op, kp_id = id, error = %e, "admin write rejected");
            } else {
                warn!(op, kp_id = id, error = %e, "admin write failed");
            }
            format!("Error: {e}")
        }
    }
}

/// Выполнить команду; `forwarded`: пост канала-хранилища из реплая, если есть.
/// Возвращает текст ответа оператору.
pub async fn execute(storage: &Storage, cmd: AdminCommand, forwarded: Option<StorageRef>) -> String {
    match cmd {
        AdminCommand::AddMovie { id, voice, quality, refs } => {
            let (chat, ids) = match refs {
                Refs::Given(r) => r,
                Refs::FromReply => match forwarded {
                    Some(r) => (r.chat_id, vec![r.message_id]),
                    None => return NEED_FORWARD.to_string(),
                },
            };
            let res = storage.upsert_movie(id, &voice, &quality, chat, &ids).await;
            write_reply("addmovie", id, res)
        }
        AdminCommand::AddMoviePart { id } => {
            let Some(r) = forwarded else { return NEED_FORWARD.to_string() };
            let res = storage.append_movie_parts(id, r.chat_id, &[r.message_id]).await;
            write_reply("addmoviepart", id, res)
        }
        AdminCommand::AddSeries { id, title } => {
            let res = storage.upsert_series(id, &title).await;
            write_reply("addseries", id, res)
        }
        AdminCommand::AddEpisode { id, season, episode, voice, quality, refs } => {
            let r = match refs {
                Refs::Given(r) => r,
                Refs::FromReply => match forwarded {
                    Some(r) => r,
                    None => return NEED_FORWARD.to_string(),
                },
            };
            let res = storage
                .upsert_series_episode(id, season, episode, &voice, &quality, r.chat_id, r.message_id)
                .await
                .map(|_| ());
            write_reply("addepisode", id, res)
        }
        AdminCommand::GetInfo { id } => match storage.get(id).await {
            Some(item) => info_text(&item),
            None => "Not found".to_string(),
        },
        AdminCommand::DelEpisode { id, season, episode } => {
            let res = storage.delete_episode(id, season, episode).await.map(|_| ());
            write_reply("delepisode", id, res)
        }
        AdminCommand::DelSeason { id, season } => {
            let res = storage.delete_season(id, season).await.map(|_| ());
            write_reply("delseason", id, res)
        }
        AdminCommand::Del { id } => {
            let res = storage.delete(id).await.map(|_| ());
            write_reply("del", id, res)
        }
        AdminCommand::List { limit } => list_text(&storage.list_recent(limit).await),
    }
}
