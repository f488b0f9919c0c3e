//! Pure extraction and rendering helpers over raw event content.
//!
//! Everything in here is synchronous, side-effect free and tolerant:
//! missing or malformed fields yield `None` or an empty string, never
//! an error.

use serde_json::{Value, json};

use crate::types::{EventKind, PresenceUpdate, RawEvent};

const HTML_FORMAT: &str = "org.matrix.custom.html";
const REL_REPLACE: &str = "m.replace";
const REL_ANNOTATION: &str = "m.annotation";

fn relates_to(content: &Value) -> Option<&Value> {
    content.get("m.relates_to")
}

/// Event id this content replies to, when a reply relation is present.
pub fn reply_target(content: &Value) -> Option<&str> {
    relates_to(content)?
        .get("m.in_reply_to")?
        .get("event_id")?
        .as_str()
}

/// Event id this content replaces, only when the relation kind is
/// `m.replace`.
pub fn replace_target(content: &Value) -> Option<&str> {
    let relation = relates_to(content)?;
    if relation.get("rel_type")?.as_str()? != REL_REPLACE {
        return None;
    }
    relation.get("event_id")?.as_str()
}

/// Embedded new-content payload of an edit, when present.
pub fn replacement_content(content: &Value) -> Option<&Value> {
    content.get("m.new_content")
}

/// Target event id and emoji key of an annotation relation.
pub fn annotation(content: &Value) -> Option<(&str, &str)> {
    let relation = relates_to(content)?;
    if relation.get("rel_type")?.as_str()? != REL_ANNOTATION {
        return None;
    }
    let target = relation.get("event_id")?.as_str()?;
    let key = relation.get("key")?.as_str()?;
    Some((target, key))
}

/// When `event` is an edit, build the event it logically stands for:
/// same sender and timestamp, the replacement content, and the
/// replaced id in place of the edit's own id.
///
/// Downstream delivery then treats "edit" uniformly as "deliver new
/// content for an existing id".
pub fn synthesize_replacement(event: &RawEvent) -> Option<RawEvent> {
    let target = replace_target(&event.content)?;
    let new_content = replacement_content(&event.content)?;
    Some(RawEvent {
        event_id: target.to_owned(),
        room_id: event.room_id.clone(),
        sender: event.sender.clone(),
        origin_server_ts: event.origin_server_ts,
        kind: EventKind::Message,
        content: new_content.clone(),
    })
}

/// Resolve the display body for a message-like event.
///
/// Prefers the plain body; when the event is a reply or an edit and a
/// rich body is present, the quoted `<mx-reply>` fallback is stripped
/// from the rich body instead so the quote is not duplicated. Emotes
/// get the `/me ` action marker.
pub fn render_body(event: &RawEvent) -> String {
    let content = &event.content;
    let plain = content
        .get("body")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let is_html = content.get("format").and_then(Value::as_str) == Some(HTML_FORMAT);
    let relates = reply_target(content).is_some() || replace_target(content).is_some();

    let mut body = match content.get("formatted_body").and_then(Value::as_str) {
        Some(formatted) if is_html && relates => strip_reply_fallback(formatted),
        _ => plain.to_owned(),
    };

    if content.get("msgtype").and_then(Value::as_str) == Some("m.emote") {
        body = format!("/me {body}");
    }
    body
}

/// Strip the `<mx-reply>` quoted-fallback wrapper and residual markup
/// from a rich body fragment, leaving plain text.
pub fn strip_reply_fallback(formatted_body: &str) -> String {
    let without_quote = match (
        formatted_body.find("<mx-reply"),
        formatted_body.find("</mx-reply>"),
    ) {
        (Some(start), Some(end)) if end >= start => {
            let after = end + "</mx-reply>".len();
            format!("{}{}", &formatted_body[..start], &formatted_body[after..])
        }
        _ => formatted_body.to_owned(),
    };

    let mut text = String::with_capacity(without_quote.len());
    let mut in_tag = false;
    for ch in without_quote.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            c if !in_tag => text.push(c),
            _ => {}
        }
    }
    decode_entities(&text)
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Event id a redaction tombstones.
pub fn redaction_target(content: &Value) -> Option<&str> {
    content.get("redacts")?.as_str()
}

/// Optional human-readable reason on a redaction.
pub fn redaction_reason(content: &Value) -> Option<&str> {
    content.get("reason")?.as_str()
}

/// Membership transition (`join`/`leave`/`ban`/`invite`) and the user
/// it affects.
pub fn membership_change(content: &Value) -> Option<(&str, &str)> {
    let membership = content.get("membership")?.as_str()?;
    let user = content.get("state_key")?.as_str()?;
    Some((membership, user))
}

/// User ids listed in a typing notice.
pub fn typing_user_ids(content: &Value) -> Vec<&str> {
    content
        .get("user_ids")
        .and_then(Value::as_array)
        .map(|ids| ids.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

/// `(user id, read event id)` pairs for the `m.read` receipts in a
/// receipt event. Other receipt types are ignored.
pub fn read_receipts(content: &Value) -> Vec<(&str, &str)> {
    content
        .get("receipts")
        .and_then(Value::as_array)
        .map(|receipts| {
            receipts
                .iter()
                .filter(|r| r.get("receipt_type").and_then(Value::as_str) == Some("m.read"))
                .filter_map(|r| {
                    let user = r.get("user_id")?.as_str()?;
                    let event = r.get("event_id")?.as_str()?;
                    Some((user, event))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Normalized presence update from a presence event's liveness and
/// activity fields.
pub fn presence_update(content: &Value) -> PresenceUpdate {
    PresenceUpdate::from_liveness(
        content
            .get("currently_active")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        content
            .get("status_msg")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned),
        content.get("last_active_ago").and_then(Value::as_u64),
    )
}

/// New room name from a name-change event.
pub fn room_name(content: &Value) -> Option<&str> {
    content.get("name")?.as_str()
}

/// New topic from a topic-change event.
pub fn room_topic(content: &Value) -> Option<&str> {
    content.get("topic")?.as_str()
}

/// New avatar URL from an avatar-change event.
pub fn room_avatar_url(content: &Value) -> Option<&str> {
    content.get("url")?.as_str()
}

/// Outbound plain-text message content.
pub fn text_message(body: &str) -> Value {
    json!({ "msgtype": "m.text", "body": body })
}

/// Attach a reply relation to outbound content. The caller must pass
/// an already-canonicalized target id.
pub fn attach_reply(content: &mut Value, reply_to: &str) {
    if let Some(obj) = content.as_object_mut() {
        obj.insert(
            "m.relates_to".to_owned(),
            json!({ "m.in_reply_to": { "event_id": reply_to } }),
        );
    }
}

/// Outbound edit content: fallback body plus the replacement payload
/// and the replace relation.
pub fn edit_message(target: &str, new_body: &str) -> Value {
    json!({
        "msgtype": "m.text",
        "body": format!("* {new_body}"),
        "m.new_content": { "msgtype": "m.text", "body": new_body },
        "m.relates_to": { "rel_type": REL_REPLACE, "event_id": target },
    })
}
