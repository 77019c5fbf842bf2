use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

/// Maximum allowed element nesting depth in the feed document.
/// Rejects maliciously deep documents before the reader recurses into them.
const MAX_FEED_DEPTH: usize = 50;

/// Errors that can occur while parsing the photo feed document.
#[derive(Debug, Error)]
pub enum ParseError {
    /// XML is malformed (unclosed tag, bad entity, encoding error).
    #[error("XML parse error: {0}")]
    Xml(String),

    /// The document contains no elements at all.
    #[error("feed document has no root element")]
    MissingRoot,

    /// Feed nesting depth exceeds the safety limit.
    #[error("feed nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),
}

/// Parses a photo feed document into an ordered list of image URL strings.
///
/// The feed's relevant shape is a sequence of `<image>` elements whose text
/// content is the image URL; nothing else in the document is interpreted.
/// Text content is trimmed and appended in document order.
///
/// An `<image>` element with no text contributes an empty string to the
/// result rather than being skipped; the caller decides whether empty
/// entries are usable (the gallery drops them with a warning).
///
/// Pure function semantics: no shared state, safe to call concurrently for
/// independent inputs. CPU-bound, so run it off the interactive thread via
/// `spawn_blocking` for large documents.
///
/// # Errors
///
/// Malformed XML or an entirely empty document yields a [`ParseError`],
/// never a partial URL list.
pub fn parse_image_urls(bytes: &[u8]) -> Result<Vec<String>, ParseError> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut urls = Vec::new();
    let mut buf = Vec::new();
    let mut depth: usize = 0;
    let mut saw_root = false;
    // Set while inside an <image> element; collects its text content.
    let mut current: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                saw_root = true;
                depth += 1;
                if depth > MAX_FEED_DEPTH {
                    return Err(ParseError::MaxDepthExceeded(MAX_FEED_DEPTH));
                }
                if e.name().as_ref() == b"image" {
                    current = Some(String::new());
                }
            }
            Ok(Event::Text(t)) => {
                if let Some(url) = current.as_mut() {
                    let text = t
                        .unescape()
                        .map_err(|e| ParseError::Xml(e.to_string()))?;
                    url.push_str(&text);
                }
            }
            Ok(Event::End(e)) => {
                depth = depth.saturating_sub(1);
                if e.name().as_ref() == b"image" {
                    if let Some(url) = current.take() {
                        urls.push(url.trim().to_string());
                    }
                }
            }
            Ok(Event::Empty(e)) => {
                saw_root = true;
                // Self-closing <image/> carries no text content
                if e.name().as_ref() == b"image" {
                    urls.push(String::new());
                }
            }
            Ok(Event::Eof) => {
                // The pull reader reports Eof even with elements still open;
                // an unclosed tag must fail, never yield a partial list.
                if depth != 0 {
                    return Err(ParseError::Xml(
                        "unexpected end of document inside open element".to_string(),
                    ));
                }
                break;
            }
            Err(e) => return Err(ParseError::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    if !saw_root {
        return Err(ParseError::MissingRoot);
    }

    Ok(urls)
}
