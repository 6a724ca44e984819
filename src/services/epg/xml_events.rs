//! Streaming XML event source
//!
//! Wraps quick-xml's async reader and flattens its events into the five
//! shapes the guide parser cares about. Only one element is buffered at a
//! time, so memory stays bounded by the largest element, not the document.

use async_stream::stream;
use futures::Stream;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use tokio::io::AsyncBufRead;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlEvent {
    Open {
        name: String,
        attributes: HashMap<String, String>,
    },
    Text(String),
    Close(String),
    Error(String),
    End,
}

fn element_name(name: &[u8]) -> String {
    String::from_utf8_lossy(name).into_owned()
}

fn collect_attributes(element: &BytesStart<'_>) -> HashMap<String, String> {
    let mut attributes = HashMap::new();
    for attr in element.attributes().with_checks(false).flatten() {
        let key = element_name(attr.key.as_ref());
        let value = match attr.unescape_value() {
            Ok(value) => value.into_owned(),
            Err(_) => String::from_utf8_lossy(&attr.value).into_owned(),
        };
        attributes.insert(key, value);
    }
    attributes
}

/// Turn a buffered byte source into document-ordered events.
///
/// A reader-level error yields `Error` followed by `End`: the source is
/// abandoned but whatever was emitted before it stands.
pub fn xml_events<R>(source: R) -> impl Stream<Item = XmlEvent>
where
    R: AsyncBufRead + Unpin,
{
    stream! {
        let mut reader = Reader::from_reader(source);
        let config = reader.config_mut();
        config.check_end_names = false;
        config.expand_empty_elements = true;

        let mut buf = Vec::new();
        loop {
            let (next, failed) = match reader.read_event_into_async(&mut buf).await {
                Ok(Event::Eof) => break,
                Ok(Event::Start(e)) => (
                    Some(XmlEvent::Open {
                        name: element_name(e.name().as_ref()),
                        attributes: collect_attributes(&e),
                    }),
                    false,
                ),
                Ok(Event::End(e)) => (Some(XmlEvent::Close(element_name(e.name().as_ref()))), false),
                Ok(Event::Text(e)) => match e.unescape() {
                    Ok(text) if text.is_empty() => (None, false),
                    Ok(text) => (Some(XmlEvent::Text(text.into_owned())), false),
                    Err(err) => (Some(XmlEvent::Error(format!("bad text: {err}"))), false),
                },
                Ok(Event::CData(e)) => (
                    Some(XmlEvent::Text(String::from_utf8_lossy(&e.into_inner()).into_owned())),
                    false,
                ),
                Ok(_) => (None, false),
                Err(err) => (
                    Some(XmlEvent::Error(format!("at byte {}: {}", reader.buffer_position(), err))),
                    true,
                ),
            };
            buf.clear();

            if let Some(event) = next {
                yield event;
            }
            // The reader cannot resynchronise after a syntax error, so the
            // rest of this document is skipped. Entries already emitted stay
            // in the guide and the caller moves on to the next source.
            if failed {
                break;
            }
        }

        yield XmlEvent::End;
    }
}
