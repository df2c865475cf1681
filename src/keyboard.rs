use std::collections::{BTreeMap, HashSet};

use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

use crate::callback::{EpisodeVoice, Nav, Step};
use crate::watch::{Episode, Season, VoiceFilter, WatchItem};

pub const EPISODES_PER_PAGE: usize = 24;
const EPISODES_PER_ROW: usize = 3;
const VOICES_PER_ROW: usize = 3;
const PROMPT_VOICES_PER_ROW: usize = 2;
const UNNAMED_VOICE: &str = "Без названия";

/* ====== Общие кнопки ====== */

fn button(text: impl Into<String>, nav: Nav) -> InlineKeyboardButton {
    InlineKeyboardButton::callback(text, nav.to_string())
}

pub fn close_button() -> InlineKeyboardButton {
    button("Закрыть", Nav::Close)
}

pub fn close_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![close_button()]])
}

fn chunked(buttons: Vec<InlineKeyboardButton>, per_row: usize) -> Vec<Vec<InlineKeyboardButton>> {
    buttons.chunks(per_row).map(|c| c.to_vec()).collect()
}

/* ====== Список сезонов ====== */

pub fn series_keyboard(item: &WatchItem) -> InlineKeyboardMarkup {
    let mut seasons: Vec<u32> = item.seasons.iter().map(|s| s.number).collect();
    seasons.sort_unstable();
    let mut rows: Vec<Vec<InlineKeyboardButton>> = seasons
        .into_iter()
        .map(|n| vec![button(format!("{n} сезон"), Nav::Season { id: item.kp_id, season: n })])
        .collect();
    rows.push(vec![close_button()]);
    InlineKeyboardMarkup::new(rows)
}

/* ====== Страница сезона ====== */

/// Озвучки сезона: без регистра, без дублей, по алфавиту.
pub fn unique_season_voices(season: &Season) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut voices: Vec<String> = season
        .episodes
        .iter()
        .flat_map(|ep| ep.voices())
        .filter(|v| seen.insert(v.to_lowercase()))
        .map(str::to_string)
        .collect();
    voices.sort();
    voices
}

/// Фильтр при открытии сезона: озвучка записи, иначе самая частая в сезоне.
pub fn initial_voice_filter(item: &WatchItem, season: &Season) -> Option<String> {
    let base = item.voice.trim();
    if !base.is_empty() {
        return Some(base.to_string());
    }
    most_common_value(season.episodes.iter().map(ep_voice))
}

/// Эпизод остаётся в выдаче, если у него не больше одного варианта
/// или один из вариантов подходит под фильтр.
pub fn episode_passes(ep: &Episode, filter: Option<&VoiceFilter>) -> bool {
    let Some(filter) = filter else {
        return true;
    };
    ep.variants.len() <= 1 || ep.variants.iter().any(|v| filter.matches(&v.voice))
}

pub fn total_pages(episodes: usize) -> u32 {
    episodes.div_ceil(EPISODES_PER_PAGE).max(1) as u32
}

pub fn season_keyboard(item: &WatchItem, season: &Season, page: u32, voice: Option<&str>) -> InlineKeyboardMarkup {
    let id = item.kp_id;
    let sn = season.number;
    let filter = voice.map(str::trim).filter(|v| !v.is_empty());

    let mut rows = vec![vec![button(format!("{sn} сезон"), Nav::Watch { id })]];

    let voices = unique_season_voices(season);
    if voices.len() > 1 {
        let mut block = vec![button("Все", Nav::SeasonVoice { id, season: sn, voice: None })];
        block.extend(voices.into_iter().map(|v| {
            let nav = Nav::SeasonVoice { id, season: sn, voice: Some(v.clone()) };
            button(v, nav)
        }));
        rows.extend(chunked(block, VOICES_PER_ROW));
    }

    let matcher = filter.map(|f| season.voice_filter(f));
    let filtered: Vec<&Episode> = season
        .episodes
        .iter()
        .filter(|e| episode_passes(e, matcher.as_ref()))
        .collect();
    let pages = total_pages(filtered.len());
    let page = page.clamp(1, pages);
    let start = (page as usize - 1) * EPISODES_PER_PAGE;

    let grid: Vec<InlineKeyboardButton> = filtered
        .iter()
        .skip(start)
        .take(EPISODES_PER_PAGE)
        .map(|ep| {
            let nav = Nav::Episode {
                id,
                season: sn,
                episode: ep.number,
                voice: EpisodeVoice::from_filter(filter, ep.variants.len()),
            };
            button(format!("{} серия", ep.number), nav)
        })
        .collect();
    rows.extend(chunked(grid, EPISODES_PER_ROW));

    let page_nav = |page: u32| Nav::SeasonPage { id, season: sn, page, voice: filter.map(str::to_string) };
    let mut nav = Vec::new();
    if page > 1 {
        nav.push(button("<<<", page_nav(page - 1)));
    }
    if page < pages {
        nav.push(button(">>>", page_nav(page + 1)));
    }
    if !nav.is_empty() {
        rows.push(nav);
    }

    rows.push(vec![close_button()]);
    InlineKeyboardMarkup::new(rows)
}

/* ====== Выбор озвучки для эпизода ====== */

pub fn voice_prompt_text(season: u32, episode: u32) -> String {
    format!("Выбери озвучку: S{season}E{episode}")
}

pub fn voice_prompt_keyboard(id: u64, season: u32, ep: &Episode) -> InlineKeyboardMarkup {
    let mut seen = HashSet::new();
    let buttons: Vec<InlineKeyboardButton> = ep
        .variants
        .iter()
        .map(|v| v.voice.trim())
        .filter(|voice| seen.insert(voice.to_lowercase()))
        .map(|voice| {
            // пустая озвучка едет в токене пустой строкой
            let nav = Nav::EpisodeVoice { id, season, episode: ep.number, voice: voice.to_string() };
            button(if voice.is_empty() { UNNAMED_VOICE } else { voice }, nav)
        })
        .collect();
    let mut rows = chunked(buttons, PROMPT_VOICES_PER_ROW);
    rows.push(vec![close_button()]);
    InlineKeyboardMarkup::new(rows)
}

/* ====== Навигация под скопированным эпизодом ====== */

/// `<<<`/`>>>` только если сосед существует по позиции в сезоне.
pub fn episode_nav_keyboard(id: u64, season: &Season, index: usize) -> InlineKeyboardMarkup {
    let mut rows = Vec::new();
    if let Some(ep) = season.episodes.get(index) {
        let step = |step: Step| Nav::EpisodeNav { id, season: season.number, episode: ep.number, step };
        let mut nav = Vec::new();
        if index > 0 {
            nav.push(button("<<<", step(Step::Prev)));
        }
        if index + 1 < season.episodes.len() {
            nav.push(button(">>>", step(Step::Next)));
        }
        if !nav.is_empty() {
            rows.push(nav);
        }
    }
    rows.push(vec![close_button()]);
    InlineKeyboardMarkup::new(rows)
}

/* ====== Заголовок сезона ====== */

/// Самое частое непустое значение; при равенстве: встреченное раньше.
pub fn most_common_value<'a>(values: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for v in values.into_iter().map(str::trim).filter(|v| !v.is_empty()) {
        match counts.iter_mut().find(|(k, _)| *k == v) {
            Some((_, n)) => *n += 1,
            None => counts.push((v, 1)),
        }
    }
    let mut best: Option<(&str, usize)> = None;
    for (k, n) in counts {
        if best.map_or(true, |(_, b)| n > b) {
            best = Some((k, n));
        }
    }
    best.map(|(k, _)| k.to_string())
}

fn diff_lines(season: &Season, base: &str, pick: fn(&Episode) -> &str) -> Vec<String> {
    let mut by_value: BTreeMap<&str, Vec<u32>> = BTreeMap::new();
    for ep in &season.episodes {
        let v = pick(ep).trim();
        if v.is_empty() || v == base {
            continue;
        }
        by_value.entry(v).or_default().push(ep.number);
    }
    let mut lines: Vec<String> = by_value
        .into_iter()
        .map(|(value, mut eps)| {
            eps.sort_unstable();
            let word = if eps.len() == 1 { "серия" } else { "серии" };
            let list: Vec<String> = eps.iter().map(u32::to_string).collect();
            format!("* ({} {} - {})", list.join(","), word, value)
        })
        .collect();
    lines.sort();
    lines
}

fn ep_voice(e: &Episode) -> &str {
    &e.voice
}

fn ep_quality(e: &Episode) -> &str {
    &e.quality
}

/// Значение записи, иначе самое частое по эпизодам сезона.
fn base_value(own: &str, season: &Season, pick: fn(&Episode) -> &str) -> String {
    let own = own.trim();
    if own.is_empty() {
        most_common_value(season.episodes.iter().map(pick)).unwrap_or_default()
    } else {
        own.to_string()
    }
}

pub fn season_header(item: &WatchItem, season_number: u32) -> String {
    let title = item.display_title();
    let Some(season) = item.season(season_number) else {
        return format!("{title}\nСезон {season_number}");
    };

    let base_voice = base_value(&item.voice, season, ep_voice);
    let base_quality = base_value(&item.quality, season, ep_quality);

    let mut lines = vec![title, format!("Сезон {season_number}")];
    lines.extend([&base_voice, &base_quality].into_iter().filter(|v| !v.is_empty()).cloned());
    lines.extend(diff_lines(season, &base_voice, ep_voice));
    lines.extend(diff_lines(season, &base_quality, ep_quality));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watch::{ItemKind, Variant};
    use teloxide::types::InlineKeyboardButtonKind;

    fn tokens(kb: &InlineKeyboardMarkup) -> Vec<Vec<String>> {
        kb.inline_keyboard
            .iter()
            .map(|row| {
                row.iter()
                    .map(|b| match &b.kind {
                        InlineKeyboardButtonKind::CallbackData(d) => d.clone(),
                        other => panic!("unexpected button kind {other:?}"),
                    })
                    .collect()
            })
            .collect()
    }

    fn flat(kb: &InlineKeyboardMarkup) -> Vec<String> {
        tokens(kb).into_iter().flatten().collect()
    }

    fn series(episodes: &[(u32, u32, &str, &str)]) -> WatchItem {
        let mut item = WatchItem::new(5, ItemKind::Series);
        item.title = "Тьма".into();
        for (i, (s, e, voice, quality)) in episodes.iter().enumerate() {
            item.upsert_episode(*s, *e, Variant::new(-100, i as i32 + 1, voice, quality));
        }
        item
    }

    #[test]
    fn series_list_has_one_button_per_season_then_close() {
        let item = series(&[(3, 1, "A", "q"), (1, 1, "A", "q"), (2, 1, "A", "q")]);
        let kb = series_keyboard(&item);
        assert_eq!(
            tokens(&kb),
            vec![
                vec!["season:5:1".to_string()],
                vec!["season:5:2".to_string()],
                vec!["season:5:3".to_string()],
                vec!["close".to_string()],
            ]
        );
        assert_eq!(kb.inline_keyboard[0][0].text, "1 сезон");
    }

    #[test]
    fn season_pages_cover_every_episode_once() {
        let eps: Vec<(u32, u32, &str, &str)> = (1..=50).map(|e| (1, e, "A", "1080p")).collect();
        let item = series(&eps);
        let season = item.season(1).unwrap();
        assert_eq!(total_pages(season.episodes.len()), 3);

        let mut seen = Vec::new();
        for page in 1..=3 {
            let kb = season_keyboard(&item, season, page, None);
            let grid: Vec<String> = flat(&kb).into_iter().filter(|t| t.starts_with("ep:")).collect();
            assert!(grid.len() <= EPISODES_PER_PAGE);
            seen.extend(grid);
        }
        let expected: Vec<String> = (1..=50).map(|e| format!("ep:5:1:{e}:")).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn season_page_navigation_and_clamping() {
        let eps: Vec<(u32, u32, &str, &str)> = (1..=30).map(|e| (1, e, "A", "q")).collect();
        let item = series(&eps);
        let season = item.season(1).unwrap();

        let first = flat(&season_keyboard(&item, season, 1, None));
        assert!(first.contains(&"seasonpage:5:1:2".to_string()));
        assert!(!first.iter().any(|t| t == "seasonpage:5:1:0"));

        let last = season_keyboard(&item, season, 99, None);
        let last_tokens = flat(&last);
        assert!(last_tokens.contains(&"seasonpage:5:1:1".to_string()));
        assert!(last_tokens.contains(&"ep:5:1:30:".to_string()));
        assert_eq!(last_tokens.first().map(String::as_str), Some("watch:5"));
        assert_eq!(last_tokens.last().map(String::as_str), Some("close"));
    }

    #[test]
    fn voice_block_and_filtered_grid() {
        let mut item = series(&[(1, 1, "LostFilm", "q"), (1, 2, "LostFilm", "q"), (1, 3, "Amedia", "q")]);
        item.upsert_episode(1, 1, Variant::new(-100, 90, "Amedia", "q"));
        let season = item.season(1).unwrap().clone();

        let kb = season_keyboard(&item, &season, 1, Some("Amedia"));
        let rows = tokens(&kb);
        assert_eq!(rows[1], vec!["seasonvoice:5:1:all", "seasonvoice:5:1:Amedia", "seasonvoice:5:1:LostFilm"]);
        let grid: Vec<&String> = rows.iter().flatten().filter(|t| t.starts_with("ep:")).collect();
        // эпизоды с одним вариантом остаются всегда
        assert_eq!(grid, vec!["ep:5:1:1:Amedia", "ep:5:1:2:Amedia", "ep:5:1:3:Amedia"]);

        let kb = season_keyboard(&item, &season, 1, None);
        let grid: Vec<String> = flat(&kb).into_iter().filter(|t| t.starts_with("ep:")).collect();
        assert_eq!(grid, vec!["ep:5:1:1:select", "ep:5:1:2:", "ep:5:1:3:"]);
    }

    #[test]
    fn multi_variant_episode_hidden_when_no_variant_matches() {
        let mut item = series(&[(1, 1, "A", "q")]);
        item.upsert_episode(1, 1, Variant::new(-100, 50, "B", "q"));
        item.upsert_episode(1, 2, Variant::new(-100, 51, "C", "q"));
        let season = item.season(1).unwrap();
        let grid: Vec<String> = flat(&season_keyboard(&item, season, 1, Some("C")))
            .into_iter()
            .filter(|t| t.starts_with("ep:"))
            .collect();
        assert_eq!(grid, vec!["ep:5:1:2:C"]);
    }

    #[test]
    fn filter_does_not_match_longer_label_by_prefix() {
        let mut item = series(&[(1, 1, "RU", "q"), (1, 2, "RUS", "q")]);
        item.upsert_episode(1, 1, Variant::new(-100, 50, "EN", "q"));
        item.upsert_episode(1, 2, Variant::new(-100, 51, "EN", "q"));
        let season = item.season(1).unwrap();
        let grid: Vec<String> = flat(&season_keyboard(&item, season, 1, Some("RU")))
            .into_iter()
            .filter(|t| t.starts_with("ep:"))
            .collect();
        assert_eq!(grid, vec!["ep:5:1:1:RU"]);
    }

    #[test]
    fn clipped_filter_still_matches_by_prefix() {
        let mut item = series(&[(1, 1, "Kubik v Kube", "q"), (1, 2, "LostFilm", "q")]);
        item.upsert_episode(1, 1, Variant::new(-100, 50, "LostFilm", "q"));
        item.upsert_episode(1, 2, Variant::new(-100, 51, "Amedia", "q"));
        let season = item.season(1).unwrap();
        let grid: Vec<String> = flat(&season_keyboard(&item, season, 1, Some("Kubik")))
            .into_iter()
            .filter(|t| t.starts_with("ep:"))
            .collect();
        assert_eq!(grid, vec!["ep:5:1:1:Kubik"]);
    }

    #[test]
    fn single_voice_season_has_no_voice_block() {
        let item = series(&[(1, 1, "A", "q"), (1, 2, " a ", "q")]);
        let kb = season_keyboard(&item, item.season(1).unwrap(), 1, None);
        assert!(!flat(&kb).iter().any(|t| t.starts_with("seasonvoice:")));
    }

    #[test]
    fn voice_prompt_dedups_and_names_unnamed() {
        let mut ep = Episode::new(4);
        ep.add_variant(Variant::new(1, 1, "RU", "q"));
        ep.add_variant(Variant::new(1, 2, "ru", "720p"));
        ep.add_variant(Variant::new(1, 3, "", "q"));
        ep.add_variant(Variant::new(1, 4, "EN", "q"));
        let kb = voice_prompt_keyboard(5, 2, &ep);
        let labels: Vec<&str> = kb.inline_keyboard.iter().flatten().map(|b| b.text.as_str()).collect();
        assert_eq!(labels, vec!["RU", "Без названия", "EN", "Закрыть"]);
        assert_eq!(kb.inline_keyboard[0].len(), 2);
        assert_eq!(tokens(&kb)[0][0], "epv:5:2:4:RU");
        assert_eq!(tokens(&kb)[0][1], "epv:5:2:4:");
        assert_eq!(voice_prompt_text(2, 4), "Выбери озвучку: S2E4");
    }

    #[test]
    fn episode_nav_has_no_dead_buttons() {
        let item = series(&[(1, 1, "A", "q"), (1, 2, "A", "q"), (1, 5, "A", "q")]);
        let season = item.season(1).unwrap();
        assert_eq!(tokens(&episode_nav_keyboard(5, season, 0)), vec![vec!["epnav:5:1:1:1"], vec!["close"]]);
        assert_eq!(
            tokens(&episode_nav_keyboard(5, season, 1)),
            vec![vec!["epnav:5:1:2:-1", "epnav:5:1:2:1"], vec!["close"]]
        );
        assert_eq!(tokens(&episode_nav_keyboard(5, season, 2)), vec![vec!["epnav:5:1:5:-1"], vec!["close"]]);
    }

    #[test]
    fn mode_ties_go_to_first_seen() {
        assert_eq!(most_common_value(["B", "A", "A", "B"]), Some("B".into()));
        assert_eq!(most_common_value(["", " C ", "D", "C"]), Some("C".into()));
        assert_eq!(most_common_value(["", "  "]), None);
    }

    #[test]
    fn season_header_lists_minorities() {
        let item = series(&[
            (1, 1, "RU", "1080p"),
            (1, 2, "EN", "1080p"),
            (1, 3, "RU", "1080p"),
            (1, 4, "EN", "720p"),
            (1, 5, "RU", "1080p"),
        ]);
        assert_eq!(
            season_header(&item, 1),
            "Тьма\nСезон 1\nRU\n1080p\n* (2,4 серии - EN)\n* (4 серия - 720p)"
        );
    }

    #[test]
    fn season_header_prefers_item_defaults_and_falls_back_to_id() {
        let mut item = series(&[(2, 1, "RU", "q"), (2, 2, "EN", "q")]);
        item.title.clear();
        item.voice = "EN".into();
        assert_eq!(season_header(&item, 2), "id_5\nСезон 2\nEN\nq\n* (1 серия - RU)");
        assert_eq!(season_header(&item, 9), "id_5\nСезон 9");
    }

    #[test]
    fn initial_filter_uses_item_voice_then_mode() {
        let mut item = series(&[(1, 1, "RU", "q"), (1, 2, "EN", "q"), (1, 3, "EN", "q")]);
        let season = item.season(1).unwrap().clone();
        assert_eq!(initial_voice_filter(&item, &season), Some("EN".into()));
        item.voice = "RU".into();
        assert_eq!(initial_voice_filter(&item, &season), Some("RU".into()));
    }
}
