//! XMLTV parser state machine
//!
//! Consumes `XmlEvent`s one at a time and hands back a finished record each
//! time a `programme` or `channel` element closes. Holds at most one
//! in-flight record, independent of transport and decompression.

use chrono::{DateTime, Utc};

use super::time::parse_epg_timestamp;
use super::xml_events::XmlEvent;
use crate::models::ProgramGuideEntry;
use crate::services::normalize::normalize_dotted;

const UNTITLED: &str = "Untitled";

/// Programme as read from the document, before validation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawProgramme {
    pub channel: Option<String>,
    pub start: Option<String>,
    pub stop: Option<String>,
    pub title: String,
    pub description: String,
    pub category: String,
}

impl RawProgramme {
    /// Validate into a guide entry. `None` when the channel reference is
    /// missing or either timestamp fails to parse.
    pub fn into_entry(self) -> Option<ProgramGuideEntry> {
        let channel = normalize_dotted(self.channel.as_deref()?);
        if channel.is_empty() {
            return None;
        }
        let start: DateTime<Utc> = parse_epg_timestamp(self.start.as_deref()?)?;
        let stop: DateTime<Utc> = parse_epg_timestamp(self.stop.as_deref()?)?;

        let title = self.title.trim();
        Some(ProgramGuideEntry {
            channel,
            start,
            stop,
            title: if title.is_empty() { UNTITLED.to_string() } else { title.to_string() },
            description: self.description.trim().to_string(),
            category: self.category.trim().to_string(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawChannel {
    pub id: Option<String>,
    pub icon: Option<String>,
}

impl RawChannel {
    /// `(dotted key, icon url)` when both are present
    pub fn into_icon(self) -> Option<(String, String)> {
        let key = normalize_dotted(self.id.as_deref()?);
        let icon = self.icon.filter(|src| !src.trim().is_empty())?;
        if key.is_empty() {
            return None;
        }
        Some((key, icon))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedItem {
    Programme(RawProgramme),
    Channel(RawChannel),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ParseState {
    Idle,
    InProgramme(RawProgramme),
    InChannel(RawChannel),
}

/// Which programme field text is currently being appended to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextField {
    Title,
    Description,
    Category,
}

impl TextField {
    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "title" => Some(Self::Title),
            "desc" => Some(Self::Description),
            "category" => Some(Self::Category),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct EpgStateMachine {
    state: ParseState,
    current_tag: Option<String>,
}

impl Default for EpgStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl EpgStateMachine {
    pub fn new() -> Self {
        Self {
            state: ParseState::Idle,
            current_tag: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state == ParseState::Idle
    }

    /// Feed one event; returns a record when its element closes.
    /// `Error` and `End` leave the state untouched.
    pub fn handle(&mut self, event: &XmlEvent) -> Option<ParsedItem> {
        match event {
            XmlEvent::Open { name, attributes } => {
                match name.as_str() {
                    "programme" => {
                        self.state = ParseState::InProgramme(RawProgramme {
                            channel: attributes.get("channel").cloned(),
                            start: attributes.get("start").cloned(),
                            stop: attributes.get("stop").cloned(),
                            ..Default::default()
                        });
                    }
                    "channel" => {
                        self.state = ParseState::InChannel(RawChannel {
                            id: attributes.get("id").cloned(),
                            icon: None,
                        });
                    }
                    "icon" => {
                        if let (ParseState::InChannel(channel), Some(src)) =
                            (&mut self.state, attributes.get("src"))
                        {
                            channel.icon = Some(src.clone());
                        }
                    }
                    _ => {}
                }
                self.current_tag = Some(name.clone());
                None
            }
            XmlEvent::Text(text) => {
                if let ParseState::InProgramme(programme) = &mut self.state {
                    let field = self.current_tag.as_deref().and_then(TextField::from_tag);
                    match field {
                        Some(TextField::Title) => programme.title.push_str(text),
                        Some(TextField::Description) => programme.description.push_str(text),
                        Some(TextField::Category) => programme.category.push_str(text),
                        None => {}
                    }
                }
                None
            }
            XmlEvent::Close(name) => {
                self.current_tag = None;
                let closes_record = matches!(
                    (name.as_str(), &self.state),
                    ("programme", ParseState::InProgramme(_)) | ("channel", ParseState::InChannel(_))
                );
                if !closes_record {
                    return None;
                }
                match std::mem::replace(&mut self.state, ParseState::Idle) {
                    ParseState::InProgramme(programme) => Some(ParsedItem::Programme(programme)),
                    ParseState::InChannel(channel) => Some(ParsedItem::Channel(channel)),
                    ParseState::Idle => None,
                }
            }
            XmlEvent::Error(_) | XmlEvent::End => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn open(name: &str, attrs: &[(&str, &str)]) -> XmlEvent {
        XmlEvent::Open {
            name: name.to_string(),
            attributes: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        }
    }

    fn close(name: &str) -> XmlEvent {
        XmlEvent::Close(name.to_string())
    }

    fn text(value: &str) -> XmlEvent {
        XmlEvent::Text(value.to_string())
    }

    fn run(events: &[XmlEvent]) -> Vec<ParsedItem> {
        let mut machine = EpgStateMachine::new();
        events.iter().filter_map(|e| machine.handle(e)).collect()
    }

    #[test]
    fn test_programme_accumulates_chunked_text() {
        let items = run(&[
            open("tv", &[]),
            open(
                "programme",
                &[("channel", "Rai.1"), ("start", "20240101100000 +0000"), ("stop", "20240101103000 +0000")],
            ),
            open("title", &[]),
            text("Tg1 "),
            text("Mattina"),
            close("title"),
            text("\n  "),
            open("desc", &[]),
            text("News"),
            close("desc"),
            open("category", &[]),
            text("Informazione"),
            close("category"),
            close("programme"),
            close("tv"),
        ]);

        assert_eq!(items.len(), 1);
        let ParsedItem::Programme(raw) = items[0].clone() else {
            panic!("expected programme");
        };
        assert_eq!(raw.title, "Tg1 Mattina");
        assert_eq!(raw.description, "News");
        assert_eq!(raw.category, "Informazione");

        let entry = raw.into_entry().unwrap();
        assert_eq!(entry.channel, "rai.1");
        assert_eq!(entry.start, Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap());
        assert_eq!(entry.stop, Utc.with_ymd_and_hms(2024, 1, 1, 10, 30, 0).unwrap());
    }

    #[test]
    fn test_text_outside_programme_is_ignored() {
        let mut machine = EpgStateMachine::new();
        machine.handle(&open("title", &[]));
        machine.handle(&text("stray"));
        machine.handle(&close("title"));
        assert!(machine.is_idle());
    }

    #[test]
    fn test_channel_icon_captured() {
        let items = run(&[
            open("channel", &[("id", "RaiUno")]),
            open("display-name", &[]),
            text("Rai 1"),
            close("display-name"),
            open("icon", &[("src", "http://logo/rai1.png")]),
            close("icon"),
            close("channel"),
        ]);

        assert_eq!(items.len(), 1);
        let ParsedItem::Channel(channel) = items[0].clone() else {
            panic!("expected channel");
        };
        assert_eq!(
            channel.into_icon(),
            Some(("raiuno".to_string(), "http://logo/rai1.png".to_string()))
        );
    }

    #[test]
    fn test_icon_outside_channel_is_ignored() {
        let items = run(&[
            open("programme", &[("channel", "a"), ("start", "x"), ("stop", "y")]),
            open("icon", &[("src", "http://logo")]),
            close("icon"),
            close("programme"),
        ]);
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], ParsedItem::Programme(_)));
    }

    #[test]
    fn test_incomplete_programmes_are_rejected() {
        let missing_channel = RawProgramme {
            start: Some("20240101100000 +0000".into()),
            stop: Some("20240101103000 +0000".into()),
            ..Default::default()
        };
        assert!(missing_channel.into_entry().is_none());

        let bad_start = RawProgramme {
            channel: Some("raiuno".into()),
            start: Some("2024010112000+0100".into()),
            stop: Some("20240101103000 +0000".into()),
            ..Default::default()
        };
        assert!(bad_start.into_entry().is_none());

        let untitled = RawProgramme {
            channel: Some("raiuno".into()),
            start: Some("20240101100000 +0000".into()),
            stop: Some("20240101103000 +0000".into()),
            ..Default::default()
        };
        assert_eq!(untitled.into_entry().unwrap().title, UNTITLED);
    }

    #[test]
    fn test_error_keeps_in_flight_record() {
        let mut machine = EpgStateMachine::new();
        machine.handle(&open("programme", &[("channel", "a")]));
        assert!(machine.handle(&XmlEvent::Error("boom".into())).is_none());
        assert!(!machine.is_idle());
        assert!(machine.handle(&close("programme")).is_some());
    }
}
