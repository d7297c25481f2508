//! Inbound message classification.
//!
//! Parses one message body and classifies it by the namespace and local name
//! of its root element (RFC 6241 section 3). Anything else is rejected; the
//! session layer decides whether that warrants a `malformed-message` reply.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::{
    Error, ErrorTag, ErrorType, Hello, Message, Notification, ReplyBody, ReplyEnvelope, RpcEnvelope, RpcError,
    NS_BASE, NS_NOTIF,
};

enum Root {
    Hello,
    Rpc,
    Reply,
    Notification,
}

/// Parse a message body and classify it by its root element.
///
/// | namespace | root | result |
/// |---|---|---|
/// | base 1.0 | `hello` | [`Message::Hello`] |
/// | base 1.0 | `rpc` | [`Message::Rpc`] |
/// | base 1.0 | `rpc-reply` | [`Message::Reply`] |
/// | notification 1.0 | `notification` | [`Message::Notification`] |
///
/// A root element without a namespace, or any other root, is an error.
pub fn classify(input: &str) -> Result<Message, Error> {
    let mut reader = Reader::from_str(input);

    loop {
        let (start, is_empty) = match reader.read_event()? {
            Event::Start(e) => (e, false),
            Event::Empty(e) => (e, true),
            Event::Decl(_) | Event::Comment(_) | Event::PI(_) | Event::DocType(_) => continue,
            Event::Text(t) => {
                if t.iter().all(|b| b.is_ascii_whitespace()) {
                    continue;
                }
                return Err(Error::Malformed {
                    reason: "text before the root element",
                });
            }
            Event::CData(_) => {
                return Err(Error::Malformed {
                    reason: "text before the root element",
                });
            }
            Event::End(_) => {
                return Err(Error::Malformed {
                    reason: "unexpected end tag",
                });
            }
            Event::Eof => {
                return Err(Error::Malformed { reason: "empty message" });
            }
        };

        // The root declares its own namespace; there is no outer scope to
        // inherit from, so its xmlns attributes are the whole story.
        let Some(ns) = root_namespace(&start)? else {
            return Err(Error::MissingNamespace);
        };
        let ns = ns.as_bytes();
        let name = start.local_name().into_inner();

        let root = if ns == NS_BASE.as_bytes() {
            match name {
                b"hello" => Root::Hello,
                b"rpc" => Root::Rpc,
                b"rpc-reply" => Root::Reply,
                _ => return Err(unexpected_root(ns, name)),
            }
        } else if ns == NS_NOTIF.as_bytes() {
            match name {
                b"notification" => Root::Notification,
                _ => return Err(unexpected_root(ns, name)),
            }
        } else {
            return Err(unexpected_root(ns, name));
        };

        return match root {
            Root::Hello => {
                if is_empty {
                    Ok(Message::Hello(Hello {
                        capabilities: Vec::new(),
                        session_id: None,
                    }))
                } else {
                    parse_hello(&mut reader).map(Message::Hello)
                }
            }
            Root::Rpc => parse_rpc(&mut reader, input, &start, is_empty).map(Message::Rpc),
            Root::Reply => parse_reply(&mut reader, input, &start, is_empty).map(Message::Reply),
            Root::Notification => parse_notification(&mut reader, input, is_empty).map(Message::Notification),
        };
    }
}

fn unexpected_root(ns: &[u8], name: &[u8]) -> Error {
    Error::UnexpectedRoot {
        ns: String::from_utf8_lossy(ns).into_owned(),
        name: String::from_utf8_lossy(name).into_owned(),
    }
}

/// Namespace the root element is bound to, from its own declarations:
/// `xmlns:<prefix>` for a prefixed root, default `xmlns` otherwise.
fn root_namespace(start: &BytesStart<'_>) -> Result<Option<String>, Error> {
    match start.name().prefix() {
        Some(prefix) => {
            let mut key = Vec::from(&b"xmlns:"[..]);
            key.extend_from_slice(prefix.into_inner());
            attribute_value(start, &key)
        }
        None => attribute_value(start, b"xmlns"),
    }
}

enum HelloField {
    Capability,
    SessionId,
}

fn parse_hello(reader: &mut Reader<&[u8]>) -> Result<Hello, Error> {
    let mut capabilities = Vec::new();
    let mut session_id = None;
    let mut depth = 0usize;
    let mut field: Option<HelloField> = None;
    let mut text = String::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                depth += 1;
                field = match (depth, e.local_name().into_inner()) {
                    (2, b"capability") => {
                        text.clear();
                        Some(HelloField::Capability)
                    }
                    (1, b"session-id") => {
                        text.clear();
                        Some(HelloField::SessionId)
                    }
                    _ => None,
                };
            }
            Event::Empty(_) => {}
            Event::Text(t) => {
                if field.is_some() {
                    text.push_str(&t.unescape()?);
                }
            }
            Event::CData(t) => {
                if field.is_some() {
                    text.push_str(core::str::from_utf8(&t)?);
                }
            }
            Event::End(_) => {
                if depth == 0 {
                    break;
                }
                depth -= 1;
                match field.take() {
                    Some(HelloField::Capability) => capabilities.push(core::mem::take(&mut text)),
                    Some(HelloField::SessionId) => {
                        session_id = Some(text.trim().parse::<u32>().map_err(|_| Error::Malformed {
                            reason: "invalid session-id",
                        })?);
                        text.clear();
                    }
                    None => {}
                }
            }
            Event::Eof => {
                return Err(Error::Malformed {
                    reason: "unterminated hello",
                });
            }
            _ => {}
        }
    }

    Ok(Hello {
        capabilities,
        session_id,
    })
}

fn parse_rpc(
    reader: &mut Reader<&[u8]>,
    input: &str,
    start: &BytesStart<'_>,
    is_empty: bool,
) -> Result<RpcEnvelope, Error> {
    let prefix = match start.name().prefix() {
        Some(p) => Some(core::str::from_utf8(p.into_inner())?.to_owned()),
        None => None,
    };
    let attrs = raw_attributes(start)?;
    let message_id = attribute_value(start, b"message-id")?;
    let content = if is_empty {
        String::new()
    } else {
        subtree_text(reader, input)?
    };

    Ok(RpcEnvelope {
        message_id,
        prefix,
        attrs,
        content,
    })
}

fn parse_reply(
    reader: &mut Reader<&[u8]>,
    input: &str,
    start: &BytesStart<'_>,
    is_empty: bool,
) -> Result<ReplyEnvelope, Error> {
    let attrs = raw_attributes(start)?;
    let message_id = attribute_value(start, b"message-id")?;

    let empty_data = || ReplyBody::Data {
        xml: String::new(),
        with_defaults: None,
    };

    if is_empty {
        return Ok(ReplyEnvelope {
            message_id,
            attrs,
            body: empty_data(),
        });
    }

    let mut errors = Vec::new();
    let mut saw_ok = false;
    let mut data: Option<String> = None;

    loop {
        let pos = reader.buffer_position();
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().into_inner() {
                b"ok" => {
                    saw_ok = true;
                    skip_subtree(reader)?;
                }
                b"rpc-error" => errors.push(parse_rpc_error(reader, input)?),
                _ => {
                    // Response data: everything from here to the closing tag.
                    data = Some(tail_xml(reader, input, pos, 1)?);
                    break;
                }
            },
            Event::Empty(e) => match e.local_name().into_inner() {
                b"ok" => saw_ok = true,
                b"rpc-error" => {
                    return Err(Error::Malformed {
                        reason: "empty rpc-error",
                    });
                }
                _ => {
                    data = Some(tail_xml(reader, input, pos, 0)?);
                    break;
                }
            },
            Event::Text(t) => {
                if !t.iter().all(|b| b.is_ascii_whitespace()) {
                    data = Some(tail_xml(reader, input, pos, 0)?);
                    break;
                }
            }
            Event::CData(_) => {
                data = Some(tail_xml(reader, input, pos, 0)?);
                break;
            }
            Event::End(_) => break,
            Event::Eof => {
                return Err(Error::Malformed {
                    reason: "unterminated rpc-reply",
                });
            }
            _ => {}
        }
    }

    let body = if !errors.is_empty() {
        ReplyBody::Errors(errors)
    } else if saw_ok {
        ReplyBody::Ok
    } else if let Some(xml) = data {
        ReplyBody::Data {
            xml,
            with_defaults: None,
        }
    } else {
        empty_data()
    };

    Ok(ReplyEnvelope {
        message_id,
        attrs,
        body,
    })
}

fn parse_rpc_error(reader: &mut Reader<&[u8]>, input: &str) -> Result<RpcError, Error> {
    let mut typ: Option<ErrorType> = None;
    let mut tag: Option<ErrorTag> = None;
    let mut app_tag = None;
    let mut path = None;
    let mut message = None;
    let mut message_lang = None;
    let mut session_id = None;
    let mut bad_attributes = Vec::new();
    let mut bad_elements = Vec::new();
    let mut bad_namespaces = Vec::new();
    let mut info = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().into_inner() {
                b"error-type" => {
                    let text = element_text(reader)?;
                    typ = Some(ErrorType::from_wire(text.trim()).ok_or(Error::Malformed {
                        reason: "unknown error-type",
                    })?);
                }
                b"error-tag" => {
                    let text = element_text(reader)?;
                    tag = Some(ErrorTag::from_wire(text.trim()).ok_or(Error::Malformed {
                        reason: "unknown error-tag",
                    })?);
                }
                b"error-severity" => {
                    // Always `error` per RFC 6241; the value is not retained.
                    let _ = element_text(reader)?;
                }
                b"error-app-tag" => app_tag = Some(element_text(reader)?),
                b"error-path" => path = Some(element_text(reader)?),
                b"error-message" => {
                    if let Some(attr) = e
                        .try_get_attribute("xml:lang")
                        .map_err(quick_xml::Error::from)?
                    {
                        message_lang = Some(attr.unescape_value()?.into_owned());
                    }
                    message = Some(element_text(reader)?);
                }
                b"error-info" => loop {
                    let pos = reader.buffer_position();
                    match reader.read_event()? {
                        Event::Start(e) => match e.local_name().into_inner() {
                            b"session-id" => {
                                let text = element_text(reader)?;
                                session_id = Some(text.trim().parse::<u32>().map_err(|_| Error::Malformed {
                                    reason: "invalid session-id in error-info",
                                })?);
                            }
                            b"bad-attribute" => bad_attributes.push(element_text(reader)?),
                            b"bad-element" => bad_elements.push(element_text(reader)?),
                            b"bad-namespace" => bad_namespaces.push(element_text(reader)?),
                            _ => info.push(raw_element(reader, input, pos)?),
                        },
                        Event::Empty(e) => match e.local_name().into_inner() {
                            b"session-id" => {
                                return Err(Error::Malformed {
                                    reason: "invalid session-id in error-info",
                                });
                            }
                            b"bad-attribute" => bad_attributes.push(String::new()),
                            b"bad-element" => bad_elements.push(String::new()),
                            b"bad-namespace" => bad_namespaces.push(String::new()),
                            _ => info.push(input[pos..reader.buffer_position()].to_owned()),
                        },
                        Event::End(_) => break,
                        Event::Eof => {
                            return Err(Error::Malformed {
                                reason: "unterminated error-info",
                            });
                        }
                        _ => {}
                    }
                },
                _ => skip_subtree(reader)?,
            },
            Event::Empty(_) => {}
            Event::End(_) => break,
            Event::Eof => {
                return Err(Error::Malformed {
                    reason: "unterminated rpc-error",
                });
            }
            _ => {}
        }
    }

    Ok(RpcError {
        typ: typ.ok_or(Error::Malformed {
            reason: "rpc-error without error-type",
        })?,
        tag: tag.ok_or(Error::Malformed {
            reason: "rpc-error without error-tag",
        })?,
        app_tag,
        path,
        message,
        message_lang,
        session_id,
        bad_attributes,
        bad_elements,
        bad_namespaces,
        info,
    })
}

fn parse_notification(reader: &mut Reader<&[u8]>, input: &str, is_empty: bool) -> Result<Notification, Error> {
    if is_empty {
        return Err(Error::Malformed {
            reason: "notification without eventTime",
        });
    }

    let mut event_time: Option<String> = None;
    let mut content: Option<String> = None;

    loop {
        let pos = reader.buffer_position();
        match reader.read_event()? {
            Event::Start(e) => {
                if event_time.is_none() && e.local_name().into_inner() == b"eventTime" {
                    event_time = Some(element_text(reader)?);
                } else {
                    content = Some(tail_xml(reader, input, pos, 1)?);
                    break;
                }
            }
            Event::Empty(_) => {
                content = Some(tail_xml(reader, input, pos, 0)?);
                break;
            }
            Event::Text(t) => {
                if !t.iter().all(|b| b.is_ascii_whitespace()) {
                    content = Some(tail_xml(reader, input, pos, 0)?);
                    break;
                }
            }
            Event::CData(_) => {
                content = Some(tail_xml(reader, input, pos, 0)?);
                break;
            }
            Event::End(_) => break,
            Event::Eof => {
                return Err(Error::Malformed {
                    reason: "unterminated notification",
                });
            }
            _ => {}
        }
    }

    Ok(Notification {
        event_time: event_time.ok_or(Error::Malformed {
            reason: "notification without eventTime",
        })?,
        content: content.unwrap_or_default(),
    })
}

/// Raw (still escaped) attribute bytes of a start tag, leading whitespace
/// included, so they can be mirrored verbatim on a reply.
fn raw_attributes(start: &BytesStart<'_>) -> Result<String, Error> {
    let name_len = start.name().into_inner().len();
    Ok(core::str::from_utf8(&start[name_len..])?.to_owned())
}

fn attribute_value(start: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>, Error> {
    for attribute in start.attributes() {
        let attribute = attribute.map_err(quick_xml::Error::from)?;
        if attribute.key.into_inner() == key {
            return Ok(Some(attribute.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

/// Inner XML of the current element: everything between its start tag and
/// the matching end tag, markup untouched.
fn subtree_text(reader: &mut Reader<&[u8]>, input: &str) -> Result<String, Error> {
    let from = reader.buffer_position();
    tail_xml(reader, input, from, 0)
}

/// Capture raw XML from `from` up to the end tag closing the element the
/// reader is currently `depth` levels inside of. Consumes that end tag.
fn tail_xml(reader: &mut Reader<&[u8]>, input: &str, from: usize, mut depth: usize) -> Result<String, Error> {
    loop {
        let pos = reader.buffer_position();
        match reader.read_event()? {
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                if depth == 0 {
                    return Ok(input[from..pos].to_owned());
                }
                depth -= 1;
            }
            Event::Eof => {
                return Err(Error::Malformed {
                    reason: "unterminated element",
                });
            }
            _ => {}
        }
    }
}

/// One whole element (tags included) as raw XML; the start tag has already
/// been consumed and `from` points at its first byte.
fn raw_element(reader: &mut Reader<&[u8]>, input: &str, from: usize) -> Result<String, Error> {
    let mut depth = 0usize;
    loop {
        match reader.read_event()? {
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                if depth == 0 {
                    return Ok(input[from..reader.buffer_position()].to_owned());
                }
                depth -= 1;
            }
            Event::Eof => {
                return Err(Error::Malformed {
                    reason: "unterminated element",
                });
            }
            _ => {}
        }
    }
}

/// Skip the current element's content, end tag included.
fn skip_subtree(reader: &mut Reader<&[u8]>) -> Result<(), Error> {
    let mut depth = 0usize;
    loop {
        match reader.read_event()? {
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                if depth == 0 {
                    return Ok(());
                }
                depth -= 1;
            }
            Event::Eof => {
                return Err(Error::Malformed {
                    reason: "unterminated element",
                });
            }
            _ => {}
        }
    }
}

/// Accumulated character data of the current element; nested markup is
/// skipped. Consumes the end tag.
fn element_text(reader: &mut Reader<&[u8]>) -> Result<String, Error> {
    let mut text = String::new();
    let mut depth = 0usize;
    loop {
        match reader.read_event()? {
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                if depth == 0 {
                    return Ok(text);
                }
                depth -= 1;
            }
            Event::Text(t) => {
                if depth == 0 {
                    text.push_str(&t.unescape()?);
                }
            }
            Event::CData(t) => {
                if depth == 0 {
                    text.push_str(core::str::from_utf8(&t)?);
                }
            }
            Event::Eof => {
                return Err(Error::Malformed {
                    reason: "unterminated element",
                });
            }
            _ => {}
        }
    }
}
