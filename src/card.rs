use teloxide::{
    prelude::*,
    types::{
        InlineKeyboardButton, InlineKeyboardMarkup, InputFile, InputMedia, InputMediaPhoto, ParseMode,
        Recipient,
    },
};
use tracing::{debug, warn};
use unicode_segmentation::UnicodeSegmentation;

use crate::callback::Nav;
use crate::error::{Error, Result};
use crate::keyboard::close_button;
use crate::neomovies::NeoMoviesClient;
use crate::reconcile::{Reconciler, Summary};
use crate::storage::Storage;
use crate::text::{html_escape, truncate};
use crate::watch::WatchItem;

const CAPTION_LIMIT: usize = 950;
const CARD_GENRES: usize = 4;
const PLAYERS: [(&str, &str); 2] = [("Плеер 1 (Collaps)", "collaps"), ("Плеер 2 (Lumex)", "lumex")];

/// Карточка фильма: постер, подпись (HTML) и кнопки.
#[derive(Debug, Clone)]
pub struct Card {
    pub photo_url: String,
    pub caption: String,
    pub keyboard: InlineKeyboardMarkup,
}

impl Card {
    pub fn build(client: &NeoMoviesClient, s: &Summary, item: Option<&WatchItem>) -> Self {
        Self {
            photo_url: client.poster_url(s.id),
            caption: caption(s, item),
            keyboard: card_keyboard(client, s.id, item.is_some()),
        }
    }
}

fn caption(s: &Summary, item: Option<&WatchItem>) -> String {
    let name = s.display_title(item);
    let title = match &s.year {
        Some(y) => format!("{name} ({y})"),
        None => name,
    };

    // (видимый текст, html)
    let mut parts: Vec<(String, String)> = vec![(title.clone(), format!("<b>{}</b>", html_escape(&title)))];
    if s.rating > 0.0 {
        let r = format!("{:.1}", s.rating);
        parts.push((format!("Кинопоиск: {r}"), format!("<b>Кинопоиск</b>: {r}")));
    }
    let genres: Vec<&str> = s.genres.iter().map(String::as_str).take(CARD_GENRES).collect();
    if !genres.is_empty() {
        let g = genres.join(", ");
        parts.push((g.clone(), format!("<b>{}</b>", html_escape(&g))));
    }

    let head_plain = parts.iter().map(|(p, _)| p.as_str()).collect::<Vec<_>>().join("\n");
    let mut html = parts.into_iter().map(|(_, h)| h).collect::<Vec<_>>().join("\n");

    // описание режем по видимой длине, чтобы не разорвать теги
    if let Some(o) = &s.overview {
        let used = head_plain.graphemes(true).count() + 2;
        if used < CAPTION_LIMIT {
            let quoted = truncate(&format!("«{o}»"), CAPTION_LIMIT - used);
            html.push_str("\n\n");
            html.push_str(&html_escape(&quoted));
        }
    }
    html
}

pub fn card_keyboard(client: &NeoMoviesClient, id: u64, in_library: bool) -> InlineKeyboardMarkup {
    let players: Vec<InlineKeyboardButton> = PLAYERS
        .iter()
        .filter_map(|(label, provider)| {
            reqwest::Url::parse(&client.player_url(provider, id))
                .ok()
                .map(|url| InlineKeyboardButton::url(*label, url))
        })
        .collect();
    let mut rows = vec![players];
    if in_library {
        rows.push(vec![InlineKeyboardButton::callback(
            "Смотреть в Telegram",
            Nav::Watch { id }.to_string(),
        )]);
    }
    rows.push(vec![close_button()]);
    InlineKeyboardMarkup::new(rows)
}

/// Свести метаданные и собрать карточку; запись библиотеки даёт запасной заголовок и кнопку просмотра.
pub async fn load(reconciler: &Reconciler, storage: &Storage, id: u64) -> Result<Card> {
    let summary = reconciler.resolve(id).await?;
    let item = storage.get(id).await;
    debug!(kp_id = id, in_library = item.is_some(), "card resolved");
    Ok(Card::build(reconciler.client(), &summary, item.as_ref()))
}

/// Фото с подписью; если Telegram не принял фото: текстом.
pub async fn send(bot: &Bot, to: impl Into<Recipient>, card: &Card) -> Result<()> {
    let to: Recipient = to.into();
    if let Ok(url) = reqwest::Url::parse(&card.photo_url) {
        let sent = bot
            .send_photo(to.clone(), InputFile::url(url))
            .caption(card.caption.clone())
            .parse_mode(ParseMode::Html)
            .reply_markup(card.keyboard.clone())
            .await;
        match sent {
            Ok(_) => return Ok(()),
            Err(e) => warn!(error = %e, photo = %card.photo_url, "send_photo failed, falling back to text"),
        }
    }
    bot.send_message(to, card.caption.clone())
        .parse_mode(ParseMode::Html)
        .reply_markup(card.keyboard.clone())
        .await?;
    Ok(())
}

/// Подменить содержимое инлайн-сообщения на карточку.
pub async fn edit_inline(bot: &Bot, inline_message_id: &str, card: &Card) -> Result<()> {
    let url = reqwest::Url::parse(&card.photo_url)
        .map_err(|e| Error::Upstream(format!("bad photo url {}: {e}", card.photo_url)))?;
    let mut photo = InputMediaPhoto::new(InputFile::url(url));
    photo.caption = Some(card.caption.clone());
    photo.parse_mode = Some(ParseMode::Html);
    bot.edit_message_media_inline(inline_message_id, InputMedia::Photo(photo))
        .reply_markup(card.keyboard.clone())
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watch::ItemKind;
    use teloxide::types::InlineKeyboardButtonKind;

    fn client() -> NeoMoviesClient {
        NeoMoviesClient::new("https://api.example")
    }

    fn summary() -> Summary {
        Summary {
            id: 301,
            title: Some("Матрица".into()),
            year: Some("1999".into()),
            rating: 8.5,
            overview: Some("Хакер <Нео>".into()),
            genres: ["фантастика", "боевик", "киберпанк", "драма", "триллер"]
                .iter()
                .map(|g| g.to_string())
                .collect(),
            poster: None,
            imdb: None,
        }
    }

    #[test]
    fn caption_layout() {
        let card = Card::build(&client(), &summary(), None);
        assert_eq!(
            card.caption,
            "<b>Матрица (1999)</b>\n<b>Кинопоиск</b>: 8.5\n<b>фантастика, боевик, киберпанк, драма</b>\n\n«Хакер &lt;Нео&gt;»"
        );
        assert_eq!(card.photo_url, "https://api.example/api/v1/images/kp/301");
    }

    #[test]
    fn caption_without_metadata_uses_library_title() {
        let s = Summary { id: 9, ..Default::default() };
        let mut item = WatchItem::new(9, ItemKind::Series);
        item.title = "Тьма".into();
        assert_eq!(caption(&s, Some(&item)), "<b>Тьма</b>");
        assert_eq!(caption(&s, None), "<b>id_9</b>");
    }

    #[test]
    fn long_overview_fits_caption_limit() {
        let mut s = summary();
        s.overview = Some("о".repeat(2000));
        let c = caption(&s, None);
        assert!(c.ends_with("…"));
        let visible = c.replace("<b>", "").replace("</b>", "");
        assert_eq!(visible.chars().count(), CAPTION_LIMIT);
    }

    #[test]
    fn keyboard_offers_watch_only_for_library_items() {
        let kb = card_keyboard(&client(), 301, false);
        assert_eq!(kb.inline_keyboard.len(), 2);
        match &kb.inline_keyboard[0][0].kind {
            InlineKeyboardButtonKind::Url(u) => {
                assert_eq!(u.as_str(), "https://api.example/api/v1/players/collaps/kp/301")
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(kb.inline_keyboard[0][1].text, "Плеер 2 (Lumex)");

        let kb = card_keyboard(&client(), 301, true);
        assert_eq!(kb.inline_keyboard.len(), 3);
        assert_eq!(
            kb.inline_keyboard[1][0].kind,
            InlineKeyboardButtonKind::CallbackData("watch:301".into())
        );
        assert_eq!(kb.inline_keyboard[2][0].text, "Закрыть");
    }
}
