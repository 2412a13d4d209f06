//! Path queries over an [`XmlTree`].
//!
//! Supports the ElementTree flavour of XPath: child steps (`tag`, `*`,
//! `.`, `..`), the `//` descendant separator, and the predicates
//! `[@attr]`, `[@attr='v']`, `[@attr!='v']`, `[tag]`, `[tag='v']`,
//! `[tag!='v']`, `[.='v']`, `[.!='v']`, `[N]`, `[last()]` and
//! `[last()-N]`. Queries are compiled once and evaluated relative to the
//! document root element.
//!
//! Positional predicates count an element among its parent's children with
//! the same tag, whatever the step's node test or earlier predicates, so
//! `*[2]` is any element that is the second of its tag and
//! `point[@units='hPa'][1]` only matches when the first `point` is in hPa.
//! The root element has no siblings and never satisfies one.

use super::tree::{Element, NodeId, XmlTree};
use crate::error::{DriverError, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NodeTest {
    Name(String),
    Any,
    Current,
    Parent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Comparison {
    Equals(String),
    NotEquals(String),
}

impl Comparison {
    fn matches(&self, actual: &str) -> bool {
        match self {
            Comparison::Equals(expected) => actual == expected,
            Comparison::NotEquals(expected) => actual != expected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
    Attribute {
        name: String,
        comparison: Option<Comparison>,
    },
    Child {
        name: String,
        comparison: Option<Comparison>,
    },
    Text(Comparison),
    /// 1-based position
    Position(usize),
    /// `last()` minus an offset
    Last(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    axis: Axis,
    test: NodeTest,
    predicates: Vec<Predicate>,
}

/// A compiled path query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathQuery {
    source: String,
    steps: Vec<Step>,
}

impl PathQuery {
    /// Compile a path query, rejecting anything outside the supported subset
    pub fn compile(source: &str) -> Result<Self> {
        let trimmed = source.trim();
        if trimmed.is_empty() {
            return Err(DriverError::invalid_path(source, "empty path"));
        }
        if trimmed.starts_with('/') {
            return Err(DriverError::invalid_path(
                source,
                "absolute paths are not supported, queries are relative to the root element",
            ));
        }

        let segments = split_outside_brackets(trimmed, '/')
            .map_err(|reason| DriverError::invalid_path(source, reason))?;

        let mut steps = Vec::new();
        let mut axis = Axis::Child;
        let last_index = segments.len() - 1;
        for (index, segment) in segments.iter().enumerate() {
            if segment.is_empty() {
                if index == last_index {
                    return Err(DriverError::invalid_path(source, "trailing '/'"));
                }
                if axis == Axis::Descendant {
                    return Err(DriverError::invalid_path(source, "'///' is not a valid step"));
                }
                axis = Axis::Descendant;
                continue;
            }
            let step = parse_step(segment, axis)
                .map_err(|reason| DriverError::invalid_path(source, reason))?;
            steps.push(step);
            axis = Axis::Child;
        }

        Ok(Self {
            source: trimmed.to_string(),
            steps,
        })
    }

    /// The query text as configured
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// All matching elements in document order
    pub fn select<'a>(&self, tree: &'a XmlTree) -> Vec<Element<'a>> {
        let mut siblings = SiblingIndex::default();
        let mut context: Vec<Element<'a>> = vec![tree.root()];
        for step in &self.steps {
            let survivors: BTreeSet<NodeId> = candidates(&context, step)
                .into_iter()
                .filter(|element| {
                    step.predicates
                        .iter()
                        .all(|predicate| predicate_holds(predicate, element, &mut siblings))
                })
                .map(|element| element.id())
                .collect();
            context = survivors.into_iter().map(|id| tree.element(id)).collect();
            if context.is_empty() {
                break;
            }
        }
        context
    }

    /// First match in document order
    pub fn find<'a>(&self, tree: &'a XmlTree) -> Option<Element<'a>> {
        self.select(tree).into_iter().next()
    }
}

impl FromStr for PathQuery {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self> {
        Self::compile(s)
    }
}

impl fmt::Display for PathQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Elements reached by one step, before its predicates
fn candidates<'a>(context: &[Element<'a>], step: &Step) -> Vec<Element<'a>> {
    match (&step.test, step.axis) {
        (NodeTest::Current, Axis::Child) => context.to_vec(),
        (NodeTest::Parent, Axis::Child) => context.iter().filter_map(|e| e.parent()).collect(),
        (test, Axis::Child) => context
            .iter()
            .flat_map(|e| e.children().filter(move |c| name_matches(test, c)))
            .collect(),
        (test, Axis::Descendant) => {
            let roots: BTreeSet<NodeId> = context.iter().map(Element::id).collect();
            let mut matches = Vec::new();
            for element in context {
                // nested context elements are covered by their ancestor's walk
                if has_ancestor_in(element, &roots) {
                    continue;
                }
                for candidate in element.descendants() {
                    let candidate = match test {
                        NodeTest::Parent => match candidate.parent() {
                            Some(parent) => parent,
                            None => continue,
                        },
                        NodeTest::Current => candidate,
                        _ if name_matches(test, &candidate) => candidate,
                        _ => continue,
                    };
                    matches.push(candidate);
                }
            }
            matches
        }
    }
}

fn has_ancestor_in(element: &Element<'_>, ids: &BTreeSet<NodeId>) -> bool {
    let mut current = element.parent();
    while let Some(parent) = current {
        if ids.contains(&parent.id()) {
            return true;
        }
        current = parent.parent();
    }
    false
}

/// Positions of elements among their same-tag siblings, filled one parent
/// at a time as positional predicates ask for them
#[derive(Default)]
struct SiblingIndex {
    indexed: BTreeSet<NodeId>,
    positions: BTreeMap<NodeId, (usize, usize)>,
}

impl SiblingIndex {
    /// Zero-based index of `element` among its parent's children with the
    /// same tag, and how many such children there are
    fn position(&mut self, element: &Element<'_>) -> Option<(usize, usize)> {
        let parent = element.parent()?;
        if self.indexed.insert(parent.id()) {
            let mut by_tag: BTreeMap<&str, Vec<NodeId>> = BTreeMap::new();
            for child in parent.children() {
                by_tag.entry(child.name()).or_default().push(child.id());
            }
            for ids in by_tag.into_values() {
                let count = ids.len();
                for (index, id) in ids.into_iter().enumerate() {
                    self.positions.insert(id, (index, count));
                }
            }
        }
        self.positions.get(&element.id()).copied()
    }
}

fn name_matches(test: &NodeTest, element: &Element<'_>) -> bool {
    match test {
        NodeTest::Name(name) => element.name() == name,
        NodeTest::Any => true,
        NodeTest::Current | NodeTest::Parent => false,
    }
}

fn predicate_holds(
    predicate: &Predicate,
    element: &Element<'_>,
    siblings: &mut SiblingIndex,
) -> bool {
    match predicate {
        Predicate::Position(position) => siblings
            .position(element)
            .is_some_and(|(index, _)| index + 1 == *position),
        Predicate::Last(offset) => siblings
            .position(element)
            .is_some_and(|(index, count)| index + 1 + offset == count),
        Predicate::Attribute { name, comparison } => match (element.attribute(name), comparison) {
            (Some(value), Some(comparison)) => comparison.matches(value),
            (Some(_), None) => true,
            (None, _) => false,
        },
        Predicate::Child { name, comparison } => element.children().any(|child| {
            child.name() == name
                && comparison
                    .as_ref()
                    .is_none_or(|c| c.matches(&child.text_content()))
        }),
        Predicate::Text(comparison) => comparison.matches(&element.text_content()),
    }
}

fn parse_step(segment: &str, axis: Axis) -> std::result::Result<Step, String> {
    let (test_text, mut rest) = match segment.find('[') {
        Some(index) => (&segment[..index], &segment[index..]),
        None => (segment, ""),
    };

    let test = match test_text {
        "" => return Err(format!("step '{segment}' has no node test")),
        "*" => NodeTest::Any,
        "." => NodeTest::Current,
        ".." => NodeTest::Parent,
        name => NodeTest::Name(validate_name(name)?),
    };

    let mut predicates = Vec::new();
    while !rest.is_empty() {
        if !rest.starts_with('[') {
            return Err(format!("unexpected '{rest}' after predicate"));
        }
        let close = closing_bracket(rest).ok_or_else(|| format!("unclosed '[' in '{segment}'"))?;
        predicates.push(parse_predicate(rest[1..close].trim())?);
        rest = &rest[close + 1..];
    }

    Ok(Step {
        axis,
        test,
        predicates,
    })
}

fn parse_predicate(body: &str) -> std::result::Result<Predicate, String> {
    if body.is_empty() {
        return Err("empty predicate".to_string());
    }

    if let Some(offset) = body.strip_prefix("last()") {
        let offset = offset.trim();
        if offset.is_empty() {
            return Ok(Predicate::Last(0));
        }
        return offset
            .strip_prefix('-')
            .and_then(|n| n.trim().parse::<usize>().ok())
            .map(Predicate::Last)
            .ok_or_else(|| format!("unsupported last() expression '{body}'"));
    }

    if body.chars().all(|c| c.is_ascii_digit()) {
        let position: usize = body
            .parse()
            .map_err(|_| format!("invalid position '{body}'"))?;
        if position == 0 {
            return Err("positions are 1-based".to_string());
        }
        return Ok(Predicate::Position(position));
    }

    let (subject, comparison) = split_comparison(body)?;
    if let Some(attribute) = subject.strip_prefix('@') {
        return Ok(Predicate::Attribute {
            name: validate_name(attribute.trim())?,
            comparison,
        });
    }
    if subject == "." {
        return comparison
            .map(Predicate::Text)
            .ok_or_else(|| "'[.]' needs a comparison".to_string());
    }
    Ok(Predicate::Child {
        name: validate_name(subject)?,
        comparison,
    })
}

/// Split `subject='value'` / `subject!="value"` into its parts
fn split_comparison(body: &str) -> std::result::Result<(&str, Option<Comparison>), String> {
    let Some(eq) = body.find('=') else {
        return Ok((body.trim(), None));
    };

    let negated = eq > 0 && body.as_bytes()[eq - 1] == b'!';
    let subject_end = if negated { eq - 1 } else { eq };
    let subject = body[..subject_end].trim();
    let value = unquote(body[eq + 1..].trim())?;

    let comparison = if negated {
        Comparison::NotEquals(value)
    } else {
        Comparison::Equals(value)
    };
    Ok((subject, Some(comparison)))
}

fn unquote(literal: &str) -> std::result::Result<String, String> {
    let mut chars = literal.chars();
    match (chars.next(), chars.next_back()) {
        (Some(open), Some(close)) if open == close && (open == '\'' || open == '"') => {
            Ok(literal[1..literal.len() - 1].to_string())
        }
        _ => Err(format!("expected a quoted string, found '{literal}'")),
    }
}

fn validate_name(name: &str) -> std::result::Result<String, String> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
        && !name.starts_with(|c: char| c.is_ascii_digit() || c == '-' || c == '.');
    if valid {
        Ok(name.to_string())
    } else {
        Err(format!("invalid name '{name}'"))
    }
}

/// Index of the `]` matching the `[` at the start of `text`
fn closing_bracket(text: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (index, c) in text.char_indices().skip(1) {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, ']') => return Some(index),
            (None, '[') => return None,
            (None, _) => {}
        }
    }
    None
}

fn split_outside_brackets(text: &str, separator: char) -> std::result::Result<Vec<&str>, String> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (index, c) in text.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') if depth > 0 => quote = Some(c),
            (None, '[') => depth += 1,
            (None, ']') => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| "unbalanced ']'".to_string())?;
            }
            (None, c) if c == separator && depth == 0 => {
                parts.push(&text[start..index]);
                start = index + c.len_utf8();
            }
            _ => {}
        }
    }

    if quote.is_some() {
        return Err("unterminated string literal".to_string());
    }
    if depth != 0 {
        return Err("unbalanced '['".to_string());
    }
    parts.push(&text[start..]);
    Ok(parts)
}
