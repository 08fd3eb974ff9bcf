//! Classification of attributes found at a component usage site.

use crate::handler::Handler;

#[derive(Debug, Clone, PartialEq)]
pub enum AttrBinding {
    /// `:name="expr"`: reactive prop evaluated in the parent state.
    Prop { name: String, expression: String },
    /// `@event="handler"`: listener for events the child emits.
    Listener { event: String, handler: Handler },
    /// `class="..."`: merged into the template root.
    Class(Vec<String>),
    /// `style="..."`: appended to the template root's style.
    Style(String),
    /// `slot="name"`: only meaningful on children being projected.
    SlotTarget(String),
    /// Any other attribute: a literal string prop.
    Static { name: String, value: String },
}

pub fn classify(name: &str, value: &str) -> AttrBinding {
    if let Some(prop) = name.strip_prefix(':') {
        return AttrBinding::Prop {
            name: camel_case(prop),
            expression: value.to_string(),
        };
    }
    if let Some(event) = name.strip_prefix('@') {
        return AttrBinding::Listener {
            event: event.to_string(),
            handler: Handler::parse(value),
        };
    }
    match name {
        "class" => AttrBinding::Class(value.split_whitespace().map(str::to_string).collect()),
        "style" => AttrBinding::Style(value.to_string()),
        "slot" => AttrBinding::SlotTarget(value.to_string()),
        _ => AttrBinding::Static {
            name: camel_case(name),
            value: value.to_string(),
        },
    }
}

/// Prop key for an attribute name: `user-name` → `userName`. Attribute
/// names arrive lower-cased from the parser, so hyphens are the only word
/// boundary left.
pub fn camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = false;
    for c in name.chars() {
        if c == '-' {
            upper = !out.is_empty();
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}
