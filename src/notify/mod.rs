pub mod telegram;

pub use telegram::TelegramSink;

use crate::models::Candidate;
use async_trait::async_trait;

/// Telegram's hard limit for media captions.
pub const CAPTION_LIMIT: usize = 1024;

const HEADER: &str = "🏠 НОВА КВАРТИРА ДЛЯ ОРЕНДИ";
const DESCRIPTION_LABEL: &str = "📝 Опис: ";
const ELLIPSIS: char = '…';

/// Best-effort delivery of one listing to one channel.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn post_candidate(&self, candidate: &Candidate, channel: &str) -> bool;
}

/// HTML caption for a listing, at most [`CAPTION_LIMIT`] visible characters.
///
/// Only the description is shortened; the fact lines are always kept.
pub fn compose_caption(candidate: &Candidate) -> String {
    let facts = fact_lines(candidate);

    let facts_len: usize = facts
        .iter()
        .map(|(label, value)| label.chars().count() + value.chars().count() + 1)
        .sum();
    let fixed = HEADER.chars().count() + 2 + facts_len;

    let description = candidate.description.trim();
    let description = if description.is_empty() {
        None
    } else {
        let budget = CAPTION_LIMIT.saturating_sub(fixed + DESCRIPTION_LABEL.chars().count() + 2);
        truncate_chars(description, budget)
    };

    let mut caption = format!("<b>{}</b>\n\n", HEADER);
    if let Some(description) = description {
        caption.push_str(&format!(
            "<b>{}</b>{}\n\n",
            DESCRIPTION_LABEL,
            escape_html(&description)
        ));
    }
    for (label, value) in &facts {
        if label.starts_with("📞") {
            caption.push_str(&format!("<b>{}</b><code>{}</code>\n", label, escape_html(value)));
        } else {
            caption.push_str(&format!("<b>{}</b>{}\n", label, escape_html(value)));
        }
    }
    caption
}

fn fact_lines(candidate: &Candidate) -> Vec<(&'static str, String)> {
    let mut lines = vec![
        ("📍 Адреса: ", candidate.address.clone()),
        ("💰 Ціна: ", format_price(candidate.price)),
        (
            "🏢 Поверх: ",
            format!("{}/{}", candidate.floor, candidate.floors_count),
        ),
        ("🛏 Кімнат: ", candidate.rooms.to_string()),
        ("📐 Площа: ", format!("{} м²", candidate.area)),
    ];
    if let Some(phone) = candidate.phone.as_deref().filter(|p| !p.is_empty()) {
        lines.push(("📞 Телефон: ", phone.to_string()));
    }
    lines
}

fn format_price(price: i64) -> String {
    if price >= 1000 {
        format!("{price} грн/міс")
    } else {
        format!("{price} грн")
    }
}

/// Cut to at most `budget` characters, marking the cut with an ellipsis.
fn truncate_chars(text: &str, budget: usize) -> Option<String> {
    if text.chars().count() <= budget {
        return Some(text.to_string());
    }
    if budget < 2 {
        return None;
    }
    let mut cut: String = text.chars().take(budget - 1).collect();
    cut.truncate(cut.trim_end().len());
    cut.push(ELLIPSIS);
    Some(cut)
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
