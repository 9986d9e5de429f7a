//! Placeholder mini-language used inside job templates
//!
//! A template string is literal text with placeholders of the form `{macros[NAME]}` or
//! `{macros[NAME]:SPEC}`. `{{` and `}}` stand for literal braces. `SPEC` is a small subset
//! of the usual format mini-language:
//!
//! ```text
//! [[fill]align][sign][0][width][.precision][type]
//! align: < > ^     sign: + -     type: s d f
//! ```
//!
//! so `{macros[jobid]:05d}` renders `7` as `00007`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::job::template::{JobDescription, JobTemplate, OptionValue, Options};

/// Per-job macro values, looked up by placeholders
pub type Macros = BTreeMap<String, MacroValue>;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum MacroValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl fmt::Display for MacroValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MacroValue::Bool(value) => write!(f, "{value}"),
            MacroValue::Integer(value) => write!(f, "{value}"),
            MacroValue::Float(value) => f.write_str(&float_repr(*value)),
            MacroValue::String(value) => write!(f, "{value}"),
        }
    }
}

/// Shortest text that reads back as `x`, always with a `.` or an exponent: `2.0`, `0.5`,
/// `1e+20`, `2.5e-05`
///
/// Exponent form is used below `1e-4` and from `1e16` on. Job names and file names built
/// from float macros depend on this exact text.
fn float_repr(x: f64) -> String {
    if !x.is_finite() {
        return x.to_string();
    }
    let scientific = format!("{x:e}");
    let (mantissa, exponent) = match scientific.split_once('e') {
        Some((mantissa, exponent)) => (mantissa, exponent.parse::<i32>().unwrap_or(0)),
        None => (scientific.as_str(), 0),
    };
    if x != 0.0 && !(-4..16).contains(&exponent) {
        let sign = if exponent < 0 { '-' } else { '+' };
        return format!("{mantissa}e{sign}{:02}", exponent.unsigned_abs());
    }
    let plain = x.to_string();
    if plain.contains('.') {
        plain
    } else {
        plain + ".0"
    }
}

impl From<&str> for MacroValue {
    fn from(value: &str) -> Self {
        MacroValue::String(value.to_string())
    }
}

impl From<String> for MacroValue {
    fn from(value: String) -> Self {
        MacroValue::String(value)
    }
}

impl From<i64> for MacroValue {
    fn from(value: i64) -> Self {
        MacroValue::Integer(value)
    }
}

/// Expand every placeholder in `template` with values from `macros`
///
/// Fails on the first placeholder that names a missing macro. Integer, float and boolean
/// option values are copied as they are.
pub fn expand(template: &JobTemplate, macros: &Macros) -> Result<JobDescription> {
    let executable = expand_str("executable", &template.executable, macros)?;
    let arguments = expand_str("arguments", &template.arguments, macros)?;

    let mut options = Options::default();
    for (name, value) in template.options.iter() {
        let value = match value {
            OptionValue::String(text) => {
                OptionValue::String(expand_str(&format!("options.{name}"), text, macros)?)
            }
            other => other.clone(),
        };
        options.insert(name.clone(), value);
    }

    let expand_files = |field: &str, files: &[String]| -> Result<Vec<String>> {
        files
            .iter()
            .enumerate()
            .map(|(i, file)| expand_str(&format!("{field}[{i}]"), file, macros))
            .collect()
    };

    Ok(JobDescription {
        executable,
        arguments,
        options,
        transfer_executable: template.transfer_executable,
        transfer_input_files: expand_files("transfer_input_files", &template.transfer_input_files)?,
        transfer_output_files: expand_files(
            "transfer_output_files",
            &template.transfer_output_files,
        )?,
    })
}

/// Expand a single template string; `field` only names the string in error messages
pub fn expand_str(field: &str, text: &str, macros: &Macros) -> Result<String> {
    let tokens = parse(text).map_err(|reason| malformed(field, text, reason))?;

    let mut out = String::with_capacity(text.len());
    for token in tokens {
        match token {
            Token::Literal(literal) => out.push_str(&literal),
            Token::Placeholder { name, spec } => {
                let value = macros.get(&name).ok_or_else(|| Error::UnresolvedMacro {
                    name: name.clone(),
                    field: field.to_string(),
                })?;
                let rendered = spec
                    .apply(value)
                    .map_err(|reason| malformed(field, text, reason))?;
                out.push_str(&rendered);
            }
        }
    }
    Ok(out)
}

/// Names of all macros referenced by a template string, in order of appearance
pub fn placeholders(text: &str) -> std::result::Result<Vec<String>, String> {
    Ok(parse(text)?
        .into_iter()
        .filter_map(|token| match token {
            Token::Placeholder { name, .. } => Some(name),
            Token::Literal(_) => None,
        })
        .collect())
}

/// Upper bound for width and precision in a format spec
const MAX_FORMAT_NUMBER: usize = 4096;

fn malformed(field: &str, text: &str, reason: String) -> Error {
    Error::MalformedPlaceholder {
        field: field.to_string(),
        text: text.to_string(),
        reason,
    }
}

#[derive(Debug, PartialEq)]
enum Token {
    Literal(String),
    Placeholder { name: String, spec: FormatSpec },
}

fn parse(text: &str) -> std::result::Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '}' => return Err("single `}` must be written as `}}`".to_string()),
            '{' => {
                let mut inner = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some('{') => return Err("nested `{` inside placeholder".to_string()),
                        Some(c) => inner.push(c),
                        None => return Err("unclosed `{`".to_string()),
                    }
                }
                if !literal.is_empty() {
                    tokens.push(Token::Literal(std::mem::take(&mut literal)));
                }
                tokens.push(parse_placeholder(&inner)?);
            }
            c => literal.push(c),
        }
    }

    if !literal.is_empty() {
        tokens.push(Token::Literal(literal));
    }
    Ok(tokens)
}

fn parse_placeholder(inner: &str) -> std::result::Result<Token, String> {
    let rest = inner
        .strip_prefix("macros[")
        .ok_or_else(|| format!("placeholder `{{{inner}}}` must look like `{{macros[NAME]}}`"))?;
    let close = rest
        .find(']')
        .ok_or_else(|| format!("missing `]` in placeholder `{{{inner}}}`"))?;

    let name = &rest[..close];
    if name.is_empty() {
        return Err("empty macro name".to_string());
    }

    let spec = match &rest[close + 1..] {
        "" => FormatSpec::default(),
        tail => match tail.strip_prefix(':') {
            Some(spec) => FormatSpec::parse(spec)?,
            None => return Err(format!("unexpected `{tail}` after macro name `{name}`")),
        },
    };

    Ok(Token::Placeholder {
        name: name.to_string(),
        spec,
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Align {
    Left,
    Right,
    Center,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Kind {
    Str,
    Int,
    Fixed,
}

#[derive(Debug, Default, PartialEq)]
struct FormatSpec {
    fill: Option<char>,
    align: Option<Align>,
    plus: bool,
    zero: bool,
    width: usize,
    precision: Option<usize>,
    kind: Option<Kind>,
}

impl FormatSpec {
    fn parse(spec: &str) -> std::result::Result<Self, String> {
        let chars: Vec<char> = spec.chars().collect();
        let mut out = FormatSpec::default();
        let mut i = 0;

        let align_of = |c: char| match c {
            '<' => Some(Align::Left),
            '>' => Some(Align::Right),
            '^' => Some(Align::Center),
            _ => None,
        };

        if let Some(align) = chars.get(1).and_then(|c| align_of(*c)) {
            out.fill = Some(chars[0]);
            out.align = Some(align);
            i = 2;
        } else if let Some(align) = chars.first().and_then(|c| align_of(*c)) {
            out.align = Some(align);
            i = 1;
        }

        match chars.get(i) {
            Some('+') => {
                out.plus = true;
                i += 1;
            }
            Some('-') => i += 1,
            _ => {}
        }

        if chars.get(i) == Some(&'0') {
            out.zero = true;
            i += 1;
        }

        let (width, next) = read_number(&chars, i)?;
        out.width = width.unwrap_or(0);
        i = next;

        if chars.get(i) == Some(&'.') {
            let (precision, next) = read_number(&chars, i + 1)?;
            out.precision = Some(precision.ok_or("missing precision after `.`")?);
            i = next;
        }

        out.kind = match chars.get(i) {
            None => None,
            Some('s') => Some(Kind::Str),
            Some('d') => Some(Kind::Int),
            Some('f') => Some(Kind::Fixed),
            Some(c) => return Err(format!("unknown format type `{c}` in `{spec}`")),
        };
        if out.kind.is_some() && i + 1 != chars.len() {
            return Err(format!("trailing characters in format spec `{spec}`"));
        }

        Ok(out)
    }

    fn apply(&self, value: &MacroValue) -> std::result::Result<String, String> {
        let (sign, body, numeric) = match (self.kind, value) {
            (Some(Kind::Int), MacroValue::Integer(n)) => {
                if self.precision.is_some() {
                    return Err("precision is not allowed with integer format `d`".to_string());
                }
                (self.sign_of(*n < 0), n.unsigned_abs().to_string(), true)
            }
            (Some(Kind::Fixed), MacroValue::Integer(n)) => self.fixed(*n as f64),
            (Some(Kind::Fixed), MacroValue::Float(x)) => self.fixed(*x),
            (None, MacroValue::Integer(n)) => {
                (self.sign_of(*n < 0), n.unsigned_abs().to_string(), true)
            }
            (None, MacroValue::Float(x)) => match self.precision {
                Some(_) => self.fixed(*x),
                None => (self.sign_of(x.is_sign_negative()), float_repr(x.abs()), true),
            },
            (Some(Kind::Str) | None, MacroValue::String(s)) => {
                let body = match self.precision {
                    Some(precision) => s.chars().take(precision).collect(),
                    None => s.clone(),
                };
                (String::new(), body, false)
            }
            (None, MacroValue::Bool(b)) => (String::new(), b.to_string(), false),
            (Some(kind), value) => {
                let kind = match kind {
                    Kind::Str => 's',
                    Kind::Int => 'd',
                    Kind::Fixed => 'f',
                };
                return Err(format!("format type `{kind}` cannot be applied to {value:?}"));
            }
        };

        Ok(self.pad(sign, body, numeric))
    }

    fn sign_of(&self, negative: bool) -> String {
        match (negative, self.plus) {
            (true, _) => "-".to_string(),
            (false, true) => "+".to_string(),
            (false, false) => String::new(),
        }
    }

    fn fixed(&self, x: f64) -> (String, String, bool) {
        let precision = self.precision.unwrap_or(6);
        (
            self.sign_of(x.is_sign_negative()),
            format!("{:.*}", precision, x.abs()),
            true,
        )
    }

    fn pad(&self, sign: String, body: String, numeric: bool) -> String {
        let len = sign.chars().count() + body.chars().count();
        if len >= self.width {
            return sign + &body;
        }
        let missing = self.width - len;

        // sign-aware zero padding: -0042
        if numeric && self.zero && self.align.is_none() && self.fill.is_none() {
            return sign + &"0".repeat(missing) + &body;
        }

        let fill = self.fill.unwrap_or(if self.zero { '0' } else { ' ' });
        let align = self
            .align
            .unwrap_or(if numeric { Align::Right } else { Align::Left });
        let repeat = |n: usize| fill.to_string().repeat(n);

        match align {
            Align::Left => sign + &body + &repeat(missing),
            Align::Right => repeat(missing) + &sign + &body,
            Align::Center => {
                let left = missing / 2;
                repeat(left) + &sign + &body + &repeat(missing - left)
            }
        }
    }
}

fn read_number(
    chars: &[char],
    start: usize,
) -> std::result::Result<(Option<usize>, usize), String> {
    let mut end = start;
    while end < chars.len() && chars[end].is_ascii_digit() {
        end += 1;
    }
    if end == start {
        return Ok((None, start));
    }
    let number: String = chars[start..end].iter().collect();
    match number.parse::<usize>() {
        Ok(value) if value <= MAX_FORMAT_NUMBER => Ok((Some(value), end)),
        _ => Err(format!("`{number}` is larger than {MAX_FORMAT_NUMBER}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn macros(pairs: &[(&str, MacroValue)]) -> Macros {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn render(text: &str, values: &[(&str, MacroValue)]) -> String {
        expand_str("arguments", text, &macros(values)).unwrap()
    }

    #[test]
    fn test_plain_substitution() {
        assert_eq!(
            render("--in {macros[inputfile]} --out x", &[("inputfile", "a.i3".into())]),
            "--in a.i3 --out x"
        );
    }

    #[test]
    fn test_literal_braces() {
        assert_eq!(render("{{}} {macros[a]}", &[("a", MacroValue::Integer(1))]), "{} 1");
    }

    #[test]
    fn test_zero_padded_integer() {
        assert_eq!(render("job_{macros[id]:05d}", &[("id", MacroValue::Integer(42))]), "job_00042");
        assert_eq!(render("{macros[id]:05d}", &[("id", MacroValue::Integer(-42))]), "-0042");
        assert_eq!(render("{macros[id]:+d}", &[("id", MacroValue::Integer(3))]), "+3");
    }

    #[test]
    fn test_alignment_and_fill() {
        assert_eq!(render("[{macros[s]:>5}]", &[("s", "ab".into())]), "[   ab]");
        assert_eq!(render("[{macros[s]:*^6}]", &[("s", "ab".into())]), "[**ab**]");
        assert_eq!(render("[{macros[n]:<4d}]", &[("n", MacroValue::Integer(7))]), "[7   ]");
        assert_eq!(render("[{macros[n]:4}]", &[("n", MacroValue::Integer(7))]), "[   7]");
    }

    #[test]
    fn test_float_precision() {
        assert_eq!(
            render("{macros[x]:.2f}", &[("x", MacroValue::Float(1.23456))]),
            "1.23"
        );
        assert_eq!(render("{macros[x]:08.3f}", &[("x", MacroValue::Integer(2))]), "0002.000");
        assert_eq!(render("{macros[s]:.3}", &[("s", "abcdef".into())]), "abc");
    }

    #[test]
    fn test_float_without_spec() {
        for (value, expected) in [
            (2.0, "2.0"),
            (0.5, "0.5"),
            (-3.0, "-3.0"),
            (1e20, "1e+20"),
            (2.5e-5, "2.5e-05"),
            (1e15, "1000000000000000.0"),
            (0.0001, "0.0001"),
        ] {
            assert_eq!(
                render("energy_{macros[e]}.i3", &[("e", MacroValue::Float(value))]),
                format!("energy_{expected}.i3")
            );
            assert_eq!(MacroValue::Float(value).to_string(), expected);
        }
    }

    #[test]
    fn test_oversized_width_rejected() {
        let values = macros(&[("a", MacroValue::Integer(1))]);
        for text in [
            "{macros[a]:099999999999999999999d}",
            "{macros[a]:0999999999999999999d}",
            "{macros[a]:4097}",
            "{macros[a]:.5000f}",
        ] {
            assert!(
                matches!(
                    expand_str("arguments", text, &values),
                    Err(Error::MalformedPlaceholder { .. })
                ),
                "{text} should be rejected"
            );
        }
        assert_eq!(render("{macros[a]:4096}", &[("a", MacroValue::Integer(1))]).len(), 4096);
    }

    #[test]
    fn test_unresolved_macro() {
        let err = expand_str("arguments", "--in {macros[inputfile]}", &Macros::new()).unwrap_err();
        match err {
            Error::UnresolvedMacro { name, field } => {
                assert_eq!(name, "inputfile");
                assert_eq!(field, "arguments");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_malformed_placeholders() {
        let values = macros(&[("a", "x".into())]);
        for text in [
            "{macros[a]",
            "{env[a]}",
            "{macros[a]:q}",
            "{macros[a]:d}",
            "a } b",
            "{macros[]}",
            "{macros[a]x}",
        ] {
            assert!(
                matches!(
                    expand_str("arguments", text, &values),
                    Err(Error::MalformedPlaceholder { .. })
                ),
                "{text} should be rejected"
            );
        }
    }

    #[test]
    fn test_placeholders_listed_in_order() {
        assert_eq!(
            placeholders("{macros[b]} and {macros[a]:03d}").unwrap(),
            vec!["b".to_string(), "a".to_string()]
        );
    }

    #[test]
    fn test_expand_template_fields() {
        let mut template = JobTemplate::new("{macros[dir]}/run.sh");
        template.arguments = "--seed {macros[seed]:04d}".to_string();
        template
            .options
            .insert("job-name".to_string(), OptionValue::from("job_{macros[seed]}"));
        template.options.insert("ntasks".to_string(), OptionValue::Integer(1));
        template.transfer_input_files = vec!["{macros[dir]}/in_{macros[seed]}.txt".to_string()];
        template.transfer_output_files = vec!["out_{macros[seed]}.txt".to_string()];

        let values = macros(&[("dir", "/data".into()), ("seed", MacroValue::Integer(7))]);
        let job = expand(&template, &values).unwrap();

        assert_eq!(job.executable(), "/data/run.sh");
        assert_eq!(job.arguments(), "--seed 0007");
        assert_eq!(
            job.options().get("job-name"),
            Some(&OptionValue::from("job_7"))
        );
        assert_eq!(job.options().get("ntasks"), Some(&OptionValue::Integer(1)));
        assert_eq!(job.transfer_input_files(), ["/data/in_7.txt"]);
        assert_eq!(job.transfer_output_files(), ["out_7.txt"]);

        // referentially transparent
        assert_eq!(expand(&template, &values).unwrap(), job);
        // nothing left to expand
        for text in [job.executable(), job.arguments()] {
            assert!(placeholders(text).unwrap().is_empty());
        }
    }

    #[test]
    fn test_error_names_offending_field() {
        let mut template = JobTemplate::new("echo");
        template.transfer_output_files = vec!["ok".to_string(), "{macros[missing]}".to_string()];
        match expand(&template, &Macros::new()).unwrap_err() {
            Error::UnresolvedMacro { field, .. } => assert_eq!(field, "transfer_output_files[1]"),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
