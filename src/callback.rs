use std::{fmt, str::FromStr};

use crate::error::Error;

pub const MAX_TOKEN_BYTES: usize = 64;

const ALL: &str = "all";
const SELECT: &str = "select";

/// Callback-токен навигации. Сессии нет, позиция экрана целиком в токене
/// (не больше 64 байт):
///
/// ```text
/// close
/// menu:<new|movies|series>
/// watch:<id>
/// season:<id>:<season>
/// seasonpage:<id>:<season>:<page>[:<voice>]
/// seasonvoice:<id>:<season>:<voice|all>
/// ep:<id>:<season>:<episode>[:<voice|select|>]
/// epnav:<id>:<season>:<episode>:<-1|1>
/// epv:<id>:<season>:<episode>:<voice>
/// ```
///
/// Озвучка кодируется percent-encoding и обрезается под остаток бюджета.
/// Метка, совпавшая с `all` или `select`, получает экранированный первый байт.
/// Пустая озвучка в `epv`: вариант без названия.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Nav {
    Close,
    Menu(Menu),
    Watch { id: u64 },
    Season { id: u64, season: u32 },
    SeasonPage { id: u64, season: u32, page: u32, voice: Option<String> },
    /// `voice: None`: показать все озвучки.
    SeasonVoice { id: u64, season: u32, voice: Option<String> },
    Episode { id: u64, season: u32, episode: u32, voice: EpisodeVoice },
    EpisodeNav { id: u64, season: u32, episode: u32, step: Step },
    EpisodeVoice { id: u64, season: u32, episode: u32, voice: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Menu {
    New,
    Movies,
    Series,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EpisodeVoice {
    /// Озвучка не важна (у эпизода один вариант).
    Any,
    /// Несколько вариантов, фильтр не выбран: надо спросить.
    Select,
    Named(String),
}

impl EpisodeVoice {
    pub fn from_filter(filter: Option<&str>, variants: usize) -> Self {
        match filter.map(str::trim).filter(|v| !v.is_empty()) {
            Some(v) => EpisodeVoice::Named(v.to_string()),
            None if variants > 1 => EpisodeVoice::Select,
            None => EpisodeVoice::Any,
        }
    }

    pub fn as_filter(&self) -> Option<&str> {
        match self {
            EpisodeVoice::Named(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Prev,
    Next,
}

impl Step {
    pub fn apply(self, index: usize) -> Option<usize> {
        match self {
            Step::Prev => index.checked_sub(1),
            Step::Next => index.checked_add(1),
        }
    }
}

impl Nav {
    pub fn item_id(&self) -> Option<u64> {
        match self {
            Nav::Close | Nav::Menu(_) => None,
            Nav::Watch { id }
            | Nav::Season { id, .. }
            | Nav::SeasonPage { id, .. }
            | Nav::SeasonVoice { id, .. }
            | Nav::Episode { id, .. }
            | Nav::EpisodeNav { id, .. }
            | Nav::EpisodeVoice { id, .. } => Some(*id),
        }
    }
}

impl fmt::Display for Nav {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            Nav::Close => "close".to_string(),
            Nav::Menu(m) => format!(
                "menu:{}",
                match m {
                    Menu::New => "new",
                    Menu::Movies => "movies",
                    Menu::Series => "series",
                }
            ),
            Nav::Watch { id } => format!("watch:{id}"),
            Nav::Season { id, season } => format!("season:{id}:{season}"),
            Nav::SeasonPage { id, season, page, voice } => {
                let head = format!("seasonpage:{id}:{season}:{page}");
                match voice.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
                    Some(v) => with_voice(head, v),
                    None => head,
                }
            }
            Nav::SeasonVoice { id, season, voice } => {
                let head = format!("seasonvoice:{id}:{season}");
                match voice.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
                    Some(v) => with_voice(head, v),
                    None => format!("{head}:{ALL}"),
                }
            }
            Nav::Episode { id, season, episode, voice } => {
                let head = format!("ep:{id}:{season}:{episode}");
                match voice {
                    EpisodeVoice::Any => format!("{head}:"),
                    EpisodeVoice::Select => format!("{head}:{SELECT}"),
                    EpisodeVoice::Named(v) => with_voice(head, v.trim()),
                }
            }
            Nav::EpisodeNav { id, season, episode, step } => {
                let dir = match step {
                    Step::Prev => "-1",
                    Step::Next => "1",
                };
                format!("epnav:{id}:{season}:{episode}:{dir}")
            }
            Nav::EpisodeVoice { id, season, episode, voice } => {
                with_voice(format!("epv:{id}:{season}:{episode}"), voice.trim())
            }
        };
        f.write_str(&token)
    }
}

/// `head:<escaped voice>`, с обрезкой метки под лимит токена.
fn with_voice(head: String, voice: &str) -> String {
    let budget = MAX_TOKEN_BYTES.saturating_sub(head.len() + 1);
    format!("{head}:{}", escape_voice(voice, budget))
}

fn escape_voice(voice: &str, budget: usize) -> String {
    let mut clipped = voice;
    loop {
        let escaped = guard_sentinel(urlencoding::encode(clipped).into_owned());
        if escaped.len() <= budget || clipped.is_empty() {
            return escaped;
        }
        let cut = clipped.char_indices().last().map(|(i, _)| i).unwrap_or(0);
        clipped = &clipped[..cut];
    }
}

fn guard_sentinel(escaped: String) -> String {
    if escaped == ALL || escaped == SELECT {
        let first = escaped.as_bytes()[0];
        format!("%{:02X}{}", first, &escaped[1..])
    } else {
        escaped
    }
}

fn unescape(raw: &str) -> Option<String> {
    // '+' как пробел: так кодировали старые кнопки
    urlencoding::decode(&raw.replace('+', " "))
        .ok()
        .map(|v| v.trim().to_string())
}

fn positive<T: FromStr + Default + PartialEq>(raw: &str) -> Option<T> {
    raw.trim().parse::<T>().ok().filter(|v| *v != T::default())
}

impl FromStr for Nav {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim();
        let parts: Vec<&str> = token.split(':').collect();
        parse_parts(&parts).ok_or_else(|| Error::InvalidToken(token.to_string()))
    }
}

fn parse_parts(parts: &[&str]) -> Option<Nav> {
    let nav = match *parts {
        ["close"] => Nav::Close,
        ["menu", "new"] => Nav::Menu(Menu::New),
        ["menu", "movies"] => Nav::Menu(Menu::Movies),
        ["menu", "series"] => Nav::Menu(Menu::Series),
        ["watch", id] => Nav::Watch { id: positive(id)? },
        ["season", id, season] => Nav::Season {
            id: positive(id)?,
            season: positive(season)?,
        },
        ["seasonpage", id, season, page] => Nav::SeasonPage {
            id: positive(id)?,
            season: positive(season)?,
            page: positive(page)?,
            voice: None,
        },
        ["seasonpage", id, season, page, voice] => Nav::SeasonPage {
            id: positive(id)?,
            season: positive(season)?,
            page: positive(page)?,
            voice: Some(unescape(voice)?).filter(|v| !v.is_empty()),
        },
        ["seasonvoice", id, season, voice] => Nav::SeasonVoice {
            id: positive(id)?,
            season: positive(season)?,
            voice: if voice == ALL {
                None
            } else {
                Some(unescape(voice)?).filter(|v| !v.is_empty())
            },
        },
        ["ep", id, season, episode] => Nav::Episode {
            id: positive(id)?,
            season: positive(season)?,
            episode: positive(episode)?,
            voice: EpisodeVoice::Any,
        },
        ["ep", id, season, episode, voice] => Nav::Episode {
            id: positive(id)?,
            season: positive(season)?,
            episode: positive(episode)?,
            voice: match voice {
                "" => EpisodeVoice::Any,
                SELECT => EpisodeVoice::Select,
                raw => {
                    let v = unescape(raw)?;
                    if v.is_empty() { EpisodeVoice::Any } else { EpisodeVoice::Named(v) }
                }
            },
        },
        ["epnav", id, season, episode, dir] => Nav::EpisodeNav {
            id: positive(id)?,
            season: positive(season)?,
            episode: positive(episode)?,
            step: match dir {
                "-1" => Step::Prev,
                "1" | "+1" => Step::Next,
                _ => return None,
            },
        },
        ["epv", id, season, episode, voice] => Nav::EpisodeVoice {
            id: positive(id)?,
            season: positive(season)?,
            episode: positive(episode)?,
            voice: unescape(voice)?,
        },
        _ => return None,
    };
    Some(nav)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(nav: Nav) {
        let token = nav.to_string();
        assert!(token.len() <= MAX_TOKEN_BYTES, "{token} is too long");
        let back: Nav = token.parse().unwrap_or_else(|e| panic!("{token}: {e}"));
        assert_eq!(back, nav, "token {token}");
    }

    #[test]
    fn every_family_round_trips() {
        round_trip(Nav::Close);
        round_trip(Nav::Menu(Menu::New));
        round_trip(Nav::Menu(Menu::Movies));
        round_trip(Nav::Menu(Menu::Series));
        round_trip(Nav::Watch { id: 1_234_567 });
        round_trip(Nav::Season { id: 77, season: 3 });
        round_trip(Nav::SeasonPage { id: 77, season: 3, page: 2, voice: None });
        round_trip(Nav::SeasonPage { id: 77, season: 3, page: 2, voice: Some("LostFilm".into()) });
        round_trip(Nav::SeasonVoice { id: 77, season: 3, voice: None });
        round_trip(Nav::SeasonVoice { id: 77, season: 3, voice: Some("Кубик в Кубе".into()) });
        round_trip(Nav::Episode { id: 77, season: 3, episode: 12, voice: EpisodeVoice::Any });
        round_trip(Nav::Episode { id: 77, season: 3, episode: 12, voice: EpisodeVoice::Select });
        round_trip(Nav::Episode {
            id: 77,
            season: 3,
            episode: 12,
            voice: EpisodeVoice::Named("HDrezka: Studio".into()),
        });
        round_trip(Nav::EpisodeNav { id: 77, season: 3, episode: 12, step: Step::Prev });
        round_trip(Nav::EpisodeNav { id: 77, season: 3, episode: 12, step: Step::Next });
        round_trip(Nav::EpisodeVoice { id: 77, season: 3, episode: 12, voice: "AniDUB".into() });
    }

    #[test]
    fn wire_format_is_stable() {
        assert_eq!(Nav::Season { id: 5, season: 1 }.to_string(), "season:5:1");
        assert_eq!(
            Nav::SeasonVoice { id: 5, season: 1, voice: None }.to_string(),
            "seasonvoice:5:1:all"
        );
        assert_eq!(
            Nav::Episode { id: 5, season: 1, episode: 2, voice: EpisodeVoice::Any }.to_string(),
            "ep:5:1:2:"
        );
        assert_eq!(
            Nav::SeasonPage { id: 5, season: 1, page: 2, voice: Some("a:b c".into()) }.to_string(),
            "seasonpage:5:1:2:a%3Ab%20c"
        );
        assert_eq!(
            Nav::EpisodeNav { id: 5, season: 1, episode: 2, step: Step::Prev }.to_string(),
            "epnav:5:1:2:-1"
        );
    }

    #[test]
    fn sentinel_lookalike_voices_survive() {
        round_trip(Nav::SeasonVoice { id: 1, season: 1, voice: Some("all".into()) });
        round_trip(Nav::Episode {
            id: 1,
            season: 1,
            episode: 1,
            voice: EpisodeVoice::Named("select".into()),
        });
    }

    #[test]
    fn legacy_plus_means_space() {
        let nav: Nav = "seasonvoice:5:1:Red+Head+Sound".parse().unwrap();
        assert_eq!(nav, Nav::SeasonVoice { id: 5, season: 1, voice: Some("Red Head Sound".into()) });
    }

    #[test]
    fn long_voice_is_clipped_to_prefix() {
        let voice = "Многоголосый закадровый перевод студии Кубик в Кубе";
        let nav = Nav::EpisodeVoice { id: 1_234_567, season: 12, episode: 120, voice: voice.into() };
        let token = nav.to_string();
        assert!(token.len() <= MAX_TOKEN_BYTES);
        let Nav::EpisodeVoice { voice: got, .. } = token.parse::<Nav>().unwrap() else {
            panic!("wrong family");
        };
        assert!(!got.is_empty());
        assert!(voice.starts_with(&got));
    }

    #[test]
    fn rejects_bad_tokens() {
        for bad in [
            "",
            "nope",
            "close:1",
            "watch:",
            "watch:0",
            "watch:-5",
            "watch:abc",
            "season:5",
            "season:5:0",
            "season:5:1:2",
            "seasonpage:5:1:0",
            "seasonpage:5:1",
            "seasonvoice:5:1",
            "ep:5:1",
            "ep:5:1:0:",
            "epnav:5:1:2:0",
            "epnav:5:1:2:2",
            "epnav:5:1:2",
            "epv:5:1:2",
            "menu:other",
            "ep:5:1:2:%ZZ%FF",
        ] {
            assert!(
                matches!(bad.parse::<Nav>(), Err(Error::InvalidToken(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn episode_voice_from_filter() {
        assert_eq!(EpisodeVoice::from_filter(Some("RU"), 3), EpisodeVoice::Named("RU".into()));
        assert_eq!(EpisodeVoice::from_filter(None, 2), EpisodeVoice::Select);
        assert_eq!(EpisodeVoice::from_filter(Some("  "), 1), EpisodeVoice::Any);
    }

    #[test]
    fn step_bounds() {
        assert_eq!(Step::Prev.apply(0), None);
        assert_eq!(Step::Prev.apply(3), Some(2));
        assert_eq!(Step::Next.apply(3), Some(4));
    }
}
