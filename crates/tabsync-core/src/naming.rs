//! File-naming codec.
//!
//! Templates are strings of literal segments and `:name` placeholders
//! separated by `-`, with a trailing `.`-initiated literal acting as the
//! fixed file extension, e.g. `:name-script-:sys_id.js`. The codec compiles
//! a record's field values into a file name and parses a file name back into
//! field values.
//!
//! Placeholder names may contain `.` for dotted reference fields
//! (`sys_scope.scope`). Because the last `.` of a template marks the
//! extension, every other dot is swapped for a sentinel character before
//! tokenizing and swapped back inside captured names.
//!
//! Known asymmetry, kept on purpose: `compile` replaces `-` inside values
//! with `^` so values cannot be confused with delimiters, and `parse` does
//! not undo the substitution. A value that contained `-` comes back with
//! `^` in its place.

use std::collections::BTreeMap;

use regex::Regex;

use crate::error::{Error, Result};

/// Delimiter separating template segments and forbidden inside values.
pub const DELIMITER: char = '-';

/// Substitute written into file names wherever a value contains [`DELIMITER`].
pub const SUBSTITUTE: char = '^';

/// Character that makes a value unusable as a file-name fragment.
const PATH_SEPARATOR: char = '/';

/// Stand-in for non-extension dots while tokenizing.
const DOT_SENTINEL: char = '\u{1}';

/// One parsed piece of a file-name template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A tokenized file-name template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    raw: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Tokenize a template into literal and placeholder segments.
    pub fn parse(template: &str) -> Self {
        let masked = mask_dots(template);
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = masked.chars().peekable();

        while let Some(ch) = chars.next() {
            if ch == ':' {
                if !literal.is_empty() {
                    segments.push(Segment::Literal(unmask(&literal)));
                    literal.clear();
                }
                let mut name = String::new();
                while let Some(&next) = chars.peek() {
                    if is_name_char(next) {
                        name.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                segments.push(Segment::Placeholder(unmask(&name)));
            } else {
                literal.push(ch);
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(unmask(&literal)));
        }

        Self {
            raw: template.to_string(),
            segments,
        }
    }

    /// The template string this was parsed from.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Placeholder names in template order.
    pub fn placeholder_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Placeholder(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Compile a file name from record field values.
    ///
    /// Values containing a path separator are rejected; delimiter characters
    /// inside values are replaced with [`SUBSTITUTE`].
    pub fn compile(&self, fields: &BTreeMap<String, String>) -> Result<String> {
        let mut file_name = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(literal) => file_name.push_str(literal),
                Segment::Placeholder(name) => {
                    let value = fields.get(name).ok_or_else(|| Error::MissingField {
                        field: name.clone(),
                    })?;
                    if value.contains(PATH_SEPARATOR) {
                        return Err(Error::InvalidFieldValue {
                            field: name.clone(),
                            value: value.clone(),
                        });
                    }
                    file_name.push_str(&value.replace(DELIMITER, &SUBSTITUTE.to_string()));
                }
            }
        }
        Ok(file_name)
    }

    /// Parse a file name, returning the field values captured by each
    /// placeholder. The delimiter substitution applied by [`Self::compile`]
    /// is not reverted.
    pub fn field_values(&self, file_name: &str) -> Result<BTreeMap<String, String>> {
        let matcher = self.matcher()?;
        let captures = matcher
            .captures(file_name)
            .ok_or_else(|| self.mismatch(file_name))?;

        let mut values = BTreeMap::new();
        for (name, capture) in self.placeholder_names().zip(captures.iter().skip(1)) {
            let capture = capture.ok_or_else(|| self.mismatch(file_name))?;
            values.insert(name.to_string(), capture.as_str().to_string());
        }
        Ok(values)
    }

    /// Build the anchored matching pattern from the tokenized segments.
    /// Each placeholder captures a run of non-delimiter characters.
    fn matcher(&self) -> Result<Regex> {
        let mut pattern = String::from("^");
        for segment in &self.segments {
            match segment {
                Segment::Literal(literal) => pattern.push_str(&regex::escape(literal)),
                Segment::Placeholder(_) => pattern.push_str("([^-]+?)"),
            }
        }
        pattern.push('$');
        Regex::new(&pattern).map_err(|_| self.mismatch(&pattern))
    }

    fn mismatch(&self, file_name: &str) -> Error {
        Error::TemplateMismatch {
            file_name: file_name.to_string(),
            template: self.raw.clone(),
        }
    }
}

fn is_name_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == DOT_SENTINEL
}

/// Replace every `.` except the last with the sentinel, so dotted placeholder
/// names survive tokenizing while the extension dot stays a literal.
fn mask_dots(template: &str) -> String {
    let last_dot = template.rfind('.');
    template
        .char_indices()
        .map(|(i, ch)| {
            if ch == '.' && Some(i) != last_dot {
                DOT_SENTINEL
            } else {
                ch
            }
        })
        .collect()
}

fn unmask(masked: &str) -> String {
    masked.replace(DOT_SENTINEL, ".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn tokenizes_literals_and_placeholders() {
        let template = Template::parse(":name-script-:sys_id.js");
        assert_eq!(
            template.segments(),
            &[
                Segment::Placeholder("name".into()),
                Segment::Literal("-script-".into()),
                Segment::Placeholder("sys_id".into()),
                Segment::Literal(".js".into()),
            ]
        );
    }

    #[test]
    fn dotted_placeholder_names_survive_the_extension_dot() {
        let template = Template::parse(":sys_scope.scope-:name-css-:sys_id.css");
        let names: Vec<_> = template.placeholder_names().collect();
        assert_eq!(names, vec!["sys_scope.scope", "name", "sys_id"]);
    }

    #[test]
    fn compiles_a_file_name_from_record_fields() {
        let template = Template::parse(":name-script-:sys_id.js");
        let data = fields(&[
            ("sys_id", "f224f2a51322fa00ca1e70a76144b072"),
            ("name", "billing.common"),
            ("sys_updated_on", "2017-07-18 01:54:41"),
            ("script", ""),
        ]);

        assert_eq!(
            template.compile(&data).unwrap(),
            "billing.common-script-f224f2a51322fa00ca1e70a76144b072.js"
        );
    }

    #[rstest]
    #[case("release-notes-tool", "release^notes^tool-script-1d58.js")]
    #[case("plain", "plain-script-1d58.js")]
    #[case("billing.common", "billing.common-script-1d58.js")]
    #[case("already^subbed", "already^subbed-script-1d58.js")]
    fn delimiter_in_a_value_becomes_the_substitute(
        #[case] name: &str,
        #[case] expected: &str,
    ) {
        let template = Template::parse(":name-script-:sys_id.js");
        let data = fields(&[("sys_id", "1d58"), ("name", name)]);

        assert_eq!(template.compile(&data).unwrap(), expected);
    }

    #[test]
    fn path_separator_in_a_value_is_rejected() {
        let template = Template::parse(":collection-:name-script-:sys_id.js");
        let data = fields(&[
            ("sys_id", "0df8452113044700ca1e70a76144b098"),
            ("name", "Recalculate Fees (ins/updt)"),
            ("collection", "po_line_item"),
        ]);

        let err = template.compile(&data).unwrap_err();
        assert!(matches!(err, Error::InvalidFieldValue { ref field, .. } if field == "name"));
    }

    #[test]
    fn missing_placeholder_value_is_an_error() {
        let template = Template::parse(":name-script-:sys_id.js");
        let err = template.compile(&fields(&[("name", "x")])).unwrap_err();
        assert!(matches!(err, Error::MissingField { ref field } if field == "sys_id"));
    }

    #[test]
    fn parses_field_values_out_of_a_file_name() {
        let template = Template::parse(":name-html-:sys_id.html");
        let values = template
            .field_values("an_example_page-html-18dabf691322fa00ca1e70a76144b0a2.html")
            .unwrap();

        assert_eq!(values["name"], "an_example_page");
        assert_eq!(values["sys_id"], "18dabf691322fa00ca1e70a76144b0a2");
    }

    #[test]
    fn round_trip_preserves_separator_free_values() {
        let template = Template::parse(":name-css-:sys_id.css");
        let data = fields(&[("name", "header.widget"), ("sys_id", "abc123")]);

        let file_name = template.compile(&data).unwrap();
        let values = template.field_values(&file_name).unwrap();

        assert_eq!(values["name"], "header.widget");
        assert_eq!(values["sys_id"], "abc123");
    }

    #[test]
    fn round_trip_does_not_revert_the_substitute() {
        let template = Template::parse(":name-css-:sys_id.css");
        let data = fields(&[("name", "dark-theme"), ("sys_id", "abc123")]);

        let file_name = template.compile(&data).unwrap();
        assert_eq!(file_name, "dark^theme-css-abc123.css");

        let values = template.field_values(&file_name).unwrap();
        assert_eq!(values["name"], "dark^theme");
    }

    #[test]
    fn non_matching_file_name_is_a_template_mismatch() {
        let template = Template::parse(":name-script-:sys_id.js");
        let err = template.field_values("free_form_notes.txt").unwrap_err();
        assert!(matches!(err, Error::TemplateMismatch { .. }));
    }

    #[test]
    fn dotted_placeholders_capture_through_the_matcher() {
        let template = Template::parse(":sys_scope.scope-:name-script-:sys_id.js");
        let values = template
            .field_values("x_app-helper-script-77aa.js")
            .unwrap();

        assert_eq!(values["sys_scope.scope"], "x_app");
        assert_eq!(values["name"], "helper");
        assert_eq!(values["sys_id"], "77aa");
    }
}
