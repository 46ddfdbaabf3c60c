//! CSS selector subset
//!
//! Supported: type selectors, `*`, `#id`, `.class`, `[attr]`, `[attr=value]`
//! (value bare or quoted), the descendant (whitespace) and child (`>`)
//! combinators, and comma-separated lists.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A selector string that could not be parsed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid selector {selector:?} at offset {position}: {reason}")]
pub struct SelectorError {
    pub selector: String,
    pub position: usize,
    pub reason: String,
}

/// Attribute condition inside a compound selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrMatch {
    pub name: String,
    pub value: Option<String>,
}

/// Conditions that must all hold on a single element
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Compound {
    pub tag: Option<String>,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub attrs: Vec<AttrMatch>,
}

impl Compound {
    pub fn tag(name: &str) -> Self {
        Self {
            tag: Some(name.to_ascii_lowercase()),
            ..Default::default()
        }
    }
}

impl fmt::Display for Compound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut empty = true;
        if let Some(tag) = &self.tag {
            write!(f, "{}", tag)?;
            empty = false;
        }
        if let Some(id) = &self.id {
            write!(f, "#{}", id)?;
            empty = false;
        }
        for class in &self.classes {
            write!(f, ".{}", class)?;
            empty = false;
        }
        for attr in &self.attrs {
            match &attr.value {
                Some(v) => write!(f, "[{}=\"{}\"]", attr.name, v)?,
                None => write!(f, "[{}]", attr.name)?,
            }
            empty = false;
        }
        if empty {
            write!(f, "*")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    /// `A B`
    Descendant,
    /// `A > B`
    Child,
}

/// Compounds joined by combinators, read left to right
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplexSelector {
    pub(crate) parts: Vec<Compound>,
    pub(crate) combinators: Vec<Combinator>,
}

impl ComplexSelector {
    pub fn single(compound: Compound) -> Self {
        Self {
            parts: vec![compound],
            combinators: Vec::new(),
        }
    }

    pub fn parts(&self) -> &[Compound] {
        &self.parts
    }

    /// The compound an element itself must match
    pub fn subject(&self) -> &Compound {
        &self.parts[self.parts.len() - 1]
    }

    /// Split `A B > C` into (`A B`, `>`, `C`); `None` for a lone compound
    pub fn split_last(&self) -> Option<(ComplexSelector, Combinator, Compound)> {
        let n = self.parts.len();
        if n < 2 {
            return None;
        }

        let parent = ComplexSelector {
            parts: self.parts[..n - 1].to_vec(),
            combinators: self.combinators[..n - 2].to_vec(),
        };
        Some((parent, self.combinators[n - 2], self.parts[n - 1].clone()))
    }

    /// Ancestor prefixes, longest first (`A B > C` gives `A B`, then `A`)
    pub fn ancestor_prefixes(&self) -> Vec<ComplexSelector> {
        (1..self.parts.len())
            .rev()
            .map(|len| ComplexSelector {
                parts: self.parts[..len].to_vec(),
                combinators: self.combinators[..len - 1].to_vec(),
            })
            .collect()
    }
}

impl fmt::Display for ComplexSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.parts[0])?;
        for (combinator, part) in self.combinators.iter().zip(&self.parts[1..]) {
            match combinator {
                Combinator::Descendant => write!(f, " {}", part)?,
                Combinator::Child => write!(f, " > {}", part)?,
            }
        }
        Ok(())
    }
}

/// A parsed selector list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    source: String,
    alternatives: Vec<ComplexSelector>,
}

impl Selector {
    pub fn parse(source: &str) -> Result<Self, SelectorError> {
        Parser::new(source).parse_list()
    }

    pub fn from_complex(complex: ComplexSelector) -> Self {
        Self {
            source: complex.to_string(),
            alternatives: vec![complex],
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn alternatives(&self) -> &[ComplexSelector] {
        &self.alternatives
    }

    /// The only alternative; a list is rejected where one element relation is needed
    pub fn single(&self) -> Result<&ComplexSelector, SelectorError> {
        match self.alternatives.as_slice() {
            [only] => Ok(only),
            _ => Err(SelectorError {
                selector: self.source.clone(),
                position: 0,
                reason: "expected a single selector, not a list".to_string(),
            }),
        }
    }
}

impl FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Selector::parse(s)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

struct Parser<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, reason: impl Into<String>) -> SelectorError {
        SelectorError {
            selector: self.source.to_string(),
            position: self.pos,
            reason: reason.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        self.pos > start
    }

    fn parse_list(&mut self) -> Result<Selector, SelectorError> {
        let mut alternatives = Vec::new();

        loop {
            self.skip_ws();
            alternatives.push(self.parse_complex()?);
            self.skip_ws();

            match self.peek() {
                None => break,
                Some(',') => self.pos += 1,
                Some(c) => return Err(self.error(format!("unexpected character {:?}", c))),
            }
        }

        Ok(Selector {
            source: self.source.trim().to_string(),
            alternatives,
        })
    }

    fn parse_complex(&mut self) -> Result<ComplexSelector, SelectorError> {
        if self.peek().is_none() {
            return Err(self.error("empty selector"));
        }

        let mut parts = vec![self.parse_compound()?];
        let mut combinators = Vec::new();

        loop {
            let had_ws = self.skip_ws();
            let combinator = match self.peek() {
                None | Some(',') => break,
                Some('>') => {
                    self.pos += 1;
                    self.skip_ws();
                    Combinator::Child
                }
                Some(_) if had_ws => Combinator::Descendant,
                Some(c) => return Err(self.error(format!("unexpected character {:?}", c))),
            };

            if matches!(self.peek(), None | Some(',') | Some('>')) {
                return Err(self.error("combinator without a following selector"));
            }

            combinators.push(combinator);
            parts.push(self.parse_compound()?);
        }

        Ok(ComplexSelector { parts, combinators })
    }

    fn parse_compound(&mut self) -> Result<Compound, SelectorError> {
        let mut compound = Compound::default();
        let mut any = false;

        match self.peek() {
            Some('*') => {
                self.pos += 1;
                any = true;
            }
            Some(c) if is_ident_char(c) => {
                compound.tag = Some(self.parse_ident()?.to_ascii_lowercase());
                any = true;
            }
            _ => {}
        }

        loop {
            match self.peek() {
                Some('#') => {
                    self.pos += 1;
                    if compound.id.is_some() {
                        return Err(self.error("more than one id in a compound selector"));
                    }
                    compound.id = Some(self.parse_ident()?);
                }
                Some('.') => {
                    self.pos += 1;
                    compound.classes.push(self.parse_ident()?);
                }
                Some('[') => {
                    self.pos += 1;
                    compound.attrs.push(self.parse_attr()?);
                }
                _ => break,
            }
            any = true;
        }

        if !any {
            return Err(match self.peek() {
                Some(c) => self.error(format!("expected a selector, found {:?}", c)),
                None => self.error("expected a selector"),
            });
        }

        Ok(compound)
    }

    fn parse_ident(&mut self) -> Result<String, SelectorError> {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_char) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.error("expected an identifier"));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn parse_attr(&mut self) -> Result<AttrMatch, SelectorError> {
        self.skip_ws();
        let name = self.parse_ident()?.to_ascii_lowercase();
        self.skip_ws();

        let value = match self.peek() {
            Some(']') => None,
            Some('=') => {
                self.pos += 1;
                self.skip_ws();
                let value = match self.peek() {
                    Some(q @ ('"' | '\'')) => self.parse_quoted(q)?,
                    _ => self.parse_ident()?,
                };
                self.skip_ws();
                Some(value)
            }
            Some(c) => return Err(self.error(format!("unsupported attribute operator {:?}", c))),
            None => return Err(self.error("unterminated attribute selector")),
        };

        match self.peek() {
            Some(']') => {
                self.pos += 1;
                Ok(AttrMatch { name, value })
            }
            _ => Err(self.error("expected ']'")),
        }
    }

    fn parse_quoted(&mut self, quote: char) -> Result<String, SelectorError> {
        self.pos += 1;
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == quote {
                let value = self.chars[start..self.pos].iter().collect();
                self.pos += 1;
                return Ok(value);
            }
            self.pos += 1;
        }
        Err(self.error("unterminated string"))
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_compound() {
        let sel = Selector::parse("div#main.video.active[data-id=\"x 1\"]").unwrap();
        let complex = sel.single().unwrap();
        let subject = complex.subject();

        assert_eq!(subject.tag.as_deref(), Some("div"));
        assert_eq!(subject.id.as_deref(), Some("main"));
        assert_eq!(subject.classes, vec!["video", "active"]);
        assert_eq!(subject.attrs[0].value.as_deref(), Some("x 1"));
    }

    #[test]
    fn test_parse_combinators() {
        let sel = Selector::parse("#comments  ytd-thread > .content").unwrap();
        let complex = sel.single().unwrap();

        assert_eq!(complex.parts().len(), 3);
        assert_eq!(
            complex.combinators,
            vec![Combinator::Descendant, Combinator::Child]
        );
        assert_eq!(complex.to_string(), "#comments ytd-thread > .content");
    }

    #[test]
    fn test_child_combinator_without_spaces() {
        let sel = Selector::parse("ul>li").unwrap();
        assert_eq!(sel.single().unwrap().combinators, vec![Combinator::Child]);
    }

    #[test]
    fn test_selector_list() {
        let sel = Selector::parse("#a, .b > c").unwrap();
        assert_eq!(sel.alternatives().len(), 2);
        assert!(sel.single().is_err());
    }

    #[test]
    fn test_split_last() {
        let sel = Selector::parse("#a .b > c").unwrap();
        let (parent, combinator, child) = sel.single().unwrap().split_last().unwrap();

        assert_eq!(parent.to_string(), "#a .b");
        assert_eq!(combinator, Combinator::Child);
        assert_eq!(child, Compound::tag("c"));

        let lone = Selector::parse("#x").unwrap();
        assert!(lone.single().unwrap().split_last().is_none());
    }

    #[test]
    fn test_ancestor_prefixes() {
        let sel = Selector::parse("#a .b > c").unwrap();
        let prefixes: Vec<String> = sel
            .single()
            .unwrap()
            .ancestor_prefixes()
            .iter()
            .map(|p| p.to_string())
            .collect();
        assert_eq!(prefixes, vec!["#a .b", "#a"]);
    }

    #[test]
    fn test_malformed_selectors() {
        for bad in ["", "   ", "#", "div >", "> div", "a,,b", "[x", "[x=\"y]", "a!b", "#a#b", "[x~=y]"] {
            let err = Selector::parse(bad).unwrap_err();
            assert_eq!(err.selector, bad, "for {:?}", bad);
        }
    }

    #[test]
    fn test_error_position() {
        let err = Selector::parse("div > ").unwrap_err();
        assert_eq!(err.position, 6);
        assert!(err.to_string().contains("combinator"));
    }
}
