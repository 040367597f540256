// SPDX-License-Identifier: MIT
// Copyright (c) 2025-2026 tailpipe.dev

//! Measurement and tag templates.
//!
//! Templates are small format strings expanded against a value list's
//! identity labels:
//!
//! | specifier | expands to      |
//! |-----------|-----------------|
//! | `%h`      | host            |
//! | `%p`      | plugin          |
//! | `%i`      | plugin instance |
//! | `%t`      | type            |
//! | `%j`      | type instance   |
//! | `%f`      | field name      |
//! | `%%`      | a literal `%`   |
//!
//! Expanded values are quoted for the line protocol: spaces and commas
//! get a backslash. An [`AttrTemplate`] bundles the measurement
//! template with a list of tag templates; tags whose value expands to
//! nothing are omitted from the output, including their key.

use std::fmt;

use bitflags::bitflags;
use tailpipe::buffer::{Buffer, BufferError};
use tailpipe::value::ValueList;

bitflags! {
    /// Which specifiers a template (or a set of templates) uses.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FormatFields: u32 {
        const HOSTNAME        = 0x01;
        const PLUGIN          = 0x02;
        const PLUGIN_INSTANCE = 0x04;
        const TYPE            = 0x08;
        const TYPE_INSTANCE   = 0x10;
        const FIELD           = 0x20;
    }
}

#[derive(Debug)]
pub enum TemplateError {
    /// `%` followed by something that is not a known specifier.
    BadSpecifier(char),
    /// Trailing `%` at the end of the template.
    Truncated,
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateError::BadSpecifier(c) => write!(f, "unknown format specifier %{}", c),
            TemplateError::Truncated => write!(f, "format string ends with a bare %"),
        }
    }
}

impl std::error::Error for TemplateError {}

/// Validate a template and report which specifiers it uses.
pub fn check_format(fmt: &str) -> Result<FormatFields, TemplateError> {
    let mut fields = FormatFields::empty();
    let mut chars = fmt.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            continue;
        }
        match chars.next() {
            Some('%') => {}
            Some('h') => fields |= FormatFields::HOSTNAME,
            Some('p') => fields |= FormatFields::PLUGIN,
            Some('i') => fields |= FormatFields::PLUGIN_INSTANCE,
            Some('t') => fields |= FormatFields::TYPE,
            Some('j') => fields |= FormatFields::TYPE_INSTANCE,
            Some('f') => fields |= FormatFields::FIELD,
            Some(other) => return Err(TemplateError::BadSpecifier(other)),
            None => return Err(TemplateError::Truncated),
        }
    }
    Ok(fields)
}

/// Append `src` with line protocol quoting: spaces and commas are
/// preceded by a backslash. Rolls back on overflow.
pub fn quote(buf: &mut Buffer, src: &str) -> Result<usize, BufferError> {
    let orig = buf.getpos();
    for b in src.bytes() {
        let r = if b == b' ' || b == b',' {
            buf.putc(b'\\').and_then(|_| buf.putc(b))
        } else {
            buf.putc(b)
        };
        if let Err(e) = r {
            buf.setpos(orig)?;
            return Err(e);
        }
    }
    Ok(buf.getpos() - orig)
}

/// Expand a validated template against `vl` into `buf`, quoting each
/// substituted value. Rolls back on overflow.
pub fn render(
    buf: &mut Buffer,
    fmt: &str,
    vl: &ValueList,
    field: &str,
) -> Result<usize, BufferError> {
    let orig = buf.getpos();
    let mut chars = fmt.chars();
    let result = (|| {
        while let Some(c) = chars.next() {
            if c != '%' {
                let mut scratch = [0u8; 4];
                buf.putstr(c.encode_utf8(&mut scratch))?;
                continue;
            }
            let value = match chars.next() {
                Some('%') => "%",
                Some('h') => &vl.host,
                Some('p') => &vl.plugin,
                Some('i') => &vl.plugin_instance,
                Some('t') => &vl.type_,
                Some('j') => &vl.type_instance,
                Some('f') => field,
                // Templates are validated before use.
                _ => return Err(BufferError::InvalidArgument),
            };
            quote(buf, value)?;
        }
        Ok(())
    })();
    match result {
        Ok(()) => Ok(buf.getpos() - orig),
        Err(e) => {
            buf.setpos(orig)?;
            Err(e)
        }
    }
}

struct TagTemplate {
    name: String,
    fmt: String,
}

/// A measurement template plus an ordered list of tag templates.
pub struct AttrTemplate {
    fmt: String,
    tags: Vec<TagTemplate>,
    fields: FormatFields,
}

impl AttrTemplate {
    pub fn new(main_fmt: &str) -> Result<Self, TemplateError> {
        let fields = check_format(main_fmt)?;
        Ok(Self {
            fmt: main_fmt.to_string(),
            tags: Vec::new(),
            fields,
        })
    }

    /// The stock template: measurement `plugin_field`, with the other
    /// labels as tags.
    pub fn default_attrs() -> Self {
        let mut attrs = match Self::new("%p_%f") {
            Ok(a) => a,
            Err(_) => unreachable!(),
        };
        for (name, fmt) in [
            ("host", "%h"),
            ("instance", "%i"),
            ("type", "%t"),
            ("type_instance", "%j"),
        ] {
            if attrs.add_tag(name, fmt).is_err() {
                unreachable!();
            }
        }
        attrs
    }

    pub fn add_tag(&mut self, name: &str, fmt: &str) -> Result<(), TemplateError> {
        let fields = check_format(fmt)?;
        self.fields |= fields;
        self.tags.push(TagTemplate {
            name: name.to_string(),
            fmt: fmt.to_string(),
        });
        Ok(())
    }

    /// The union of specifiers used by the measurement and all tags.
    pub fn fields(&self) -> FormatFields {
        self.fields
    }

    /// Write `measurement,tag=value,...` for one sample. Tags whose
    /// value is empty are left out entirely. Rolls back on overflow.
    pub fn format(
        &self,
        buf: &mut Buffer,
        vl: &ValueList,
        field: &str,
    ) -> Result<usize, BufferError> {
        let orig = buf.getpos();
        let result = (|| {
            render(buf, &self.fmt, vl, field)?;
            for tag in &self.tags {
                let tag_start = buf.getpos();
                buf.printf(format_args!(",{}=", tag.name))?;
                let value_len = render(buf, &tag.fmt, vl, field)?;
                if value_len == 0 {
                    buf.setpos(tag_start)?;
                }
            }
            Ok(())
        })();
        match result {
            Ok(()) => Ok(buf.getpos() - orig),
            Err(e) => {
                buf.setpos(orig)?;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tailpipe::value::Value;

    fn sample() -> ValueList {
        ValueList {
            host: "h1".to_string(),
            plugin: "cpu".to_string(),
            plugin_instance: "0".to_string(),
            type_: "cpu".to_string(),
            type_instance: "idle".to_string(),
            time_ns: 1_700_000_000_000_000_000,
            values: vec![("value".to_string(), Value::Gauge(42.0))],
        }
    }

    fn render_to_string(fmt: &str, vl: &ValueList) -> String {
        let mut buf = Buffer::fixed(256);
        render(&mut buf, fmt, vl, "value").unwrap();
        buf.getstr().into_owned()
    }

    #[test]
    fn test_check_format_reports_fields() {
        let f = check_format("%p_%f").unwrap();
        assert_eq!(f, FormatFields::PLUGIN | FormatFields::FIELD);
        assert_eq!(check_format("plain").unwrap(), FormatFields::empty());
        assert_eq!(check_format("100%%").unwrap(), FormatFields::empty());
    }

    #[test]
    fn test_check_format_rejects_unknown() {
        assert!(matches!(
            check_format("%x"),
            Err(TemplateError::BadSpecifier('x'))
        ));
        assert!(matches!(check_format("oops%"), Err(TemplateError::Truncated)));
    }

    #[test]
    fn test_render_substitutes_labels() {
        let vl = sample();
        assert_eq!(render_to_string("%h/%p-%i/%t-%j", &vl), "h1/cpu-0/cpu-idle");
        assert_eq!(render_to_string("%p_%f", &vl), "cpu_value");
        assert_eq!(render_to_string("%%p", &vl), "%p");
    }

    #[test]
    fn test_quote_escapes_space_and_comma() {
        let mut vl = sample();
        vl.plugin_instance = "disk 0,1".to_string();
        assert_eq!(render_to_string("%i", &vl), "disk\\ 0\\,1");
    }

    #[test]
    fn test_render_rolls_back_on_overflow() {
        let vl = sample();
        let mut buf = Buffer::fixed(8);
        buf.putstr("x").unwrap();
        assert!(render(&mut buf, "%h/%p-%i/%t-%j", &vl, "value").is_err());
        assert_eq!(buf.getstr(), "x");
    }

    #[test]
    fn test_default_attrs_full_line_prefix() {
        let vl = sample();
        let attrs = AttrTemplate::default_attrs();
        let mut buf = Buffer::fixed(256);
        attrs.format(&mut buf, &vl, "value").unwrap();
        assert_eq!(
            buf.getstr(),
            "cpu_value,host=h1,instance=0,type=cpu,type_instance=idle"
        );
    }

    #[test]
    fn test_empty_tag_is_omitted_with_its_key() {
        let mut vl = sample();
        vl.plugin_instance.clear();
        vl.type_instance.clear();
        let attrs = AttrTemplate::default_attrs();
        let mut buf = Buffer::fixed(256);
        attrs.format(&mut buf, &vl, "value").unwrap();
        assert_eq!(buf.getstr(), "cpu_value,host=h1,type=cpu");
    }

    #[test]
    fn test_attr_template_fields_union() {
        let mut attrs = AttrTemplate::new("%p").unwrap();
        attrs.add_tag("host", "%h").unwrap();
        assert_eq!(attrs.fields(), FormatFields::PLUGIN | FormatFields::HOSTNAME);
        assert!(!attrs.fields().contains(FormatFields::FIELD));
    }
}
