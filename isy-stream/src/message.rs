//! Structured view of a parsed event document.
//!
//! A pushed event looks like:
//!
//! ```xml
//! <?xml version="1.0"?>
//! <Event seqnum="12" sid="uuid:74">
//!   <control>ST</control>
//!   <action>255</action>
//!   <node>1A 2B 3C 1</node>
//!   <eventInfo></eventInfo>
//! </Event>
//! ```
//!
//! The control code is read once and mapped to [`ControlCode`] so routing
//! branches on an enum instead of searching the raw text.

use std::fmt;

use xmltree::{Element, XMLNode};

/// Classification of an event by its `<control>` element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ControlCode {
    /// `_0`: controller heartbeat, `action` carries seconds until the next one
    Heartbeat,
    /// `ST`: node status change
    Status,
    /// `_11`: weather module update
    Weather,
    /// `_1`: program or variable change
    ProgramOrVariable,
    /// Any code the stream does not route
    Other(String),
}

impl ControlCode {
    pub fn from_code(code: &str) -> Self {
        match code {
            "_0" => ControlCode::Heartbeat,
            "ST" => ControlCode::Status,
            "_11" => ControlCode::Weather,
            "_1" => ControlCode::ProgramOrVariable,
            other => ControlCode::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ControlCode::Heartbeat => "_0",
            ControlCode::Status => "ST",
            ControlCode::Weather => "_11",
            ControlCode::ProgramOrVariable => "_1",
            ControlCode::Other(code) => code,
        }
    }
}

impl fmt::Display for ControlCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a `_1` event is about, decided by the shape of its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramEventKind {
    /// Payload contains a `<var>` element
    Variable,
    /// Payload contains an `<id>` element
    Program,
    /// Neither: something changed in a program folder, details unknown
    Folder,
}

/// A parsed event document together with its extracted control code.
#[derive(Debug, Clone)]
pub struct EventMessage {
    control: Option<ControlCode>,
    document: Element,
}

impl EventMessage {
    pub fn new(document: Element) -> Self {
        let control = child_text(&document, "control").map(|code| ControlCode::from_code(&code));
        Self { control, document }
    }

    /// The control code, or `None` when the document has no `<control>` element.
    pub fn control(&self) -> Option<&ControlCode> {
        self.control.as_ref()
    }

    pub fn document(&self) -> &Element {
        &self.document
    }

    /// Trimmed text of the `<action>` element.
    pub fn action(&self) -> Option<String> {
        child_text(&self.document, "action")
    }

    /// Trimmed text of the `<node>` element.
    pub fn node(&self) -> Option<String> {
        child_text(&self.document, "node")
    }

    /// The stream session id announced on the root `Event` element.
    pub fn stream_session_id(&self) -> Option<&str> {
        find_element(&self.document, "Event")
            .and_then(|event| event.attributes.get("sid"))
            .map(String::as_str)
            .filter(|sid| !sid.is_empty())
    }

    /// Classify a program/variable event by its payload shape.
    pub fn program_event_kind(&self) -> ProgramEventKind {
        if has_descendant(&self.document, "var") {
            ProgramEventKind::Variable
        } else if has_descendant(&self.document, "id") {
            ProgramEventKind::Program
        } else {
            ProgramEventKind::Folder
        }
    }
}

fn child_text(element: &Element, name: &str) -> Option<String> {
    element
        .get_child(name)
        .and_then(|child| child.get_text())
        .map(|text| text.trim().to_string())
}

fn find_element<'a>(element: &'a Element, name: &str) -> Option<&'a Element> {
    if element.name == name {
        return Some(element);
    }
    children(element).find_map(|child| find_element(child, name))
}

fn has_descendant(element: &Element, name: &str) -> bool {
    children(element).any(|child| child.name == name || has_descendant(child, name))
}

fn children(element: &Element) -> impl Iterator<Item = &Element> {
    element.children.iter().filter_map(XMLNode::as_element)
}
