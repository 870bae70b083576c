use nom::{
    bytes::complete::take_while1,
    character::complete::one_of,
    combinator::opt,
    IResult,
};

use crate::core::error::{Error, Result};
use crate::query::ast::{Modifier, Op, QueryNode, RangeBound};

/// Parses the statement grammar of §4.8:
/// `statement := [op] key (':' value | '<' value | '>' value)`, one
/// statement per line (`\r` treated the same as `\n`). Produces a singly
/// linked chain of `QueryNode`s joined by `next`; a value that tokenizes to
/// more than one term threads the extras through `then`.
pub struct QueryParser {
    pub default_fuzzy_edits: u8,
}

impl Default for QueryParser {
    fn default() -> Self {
        QueryParser { default_fuzzy_edits: 2 }
    }
}

impl QueryParser {
    pub fn new(default_fuzzy_edits: u8) -> Self {
        QueryParser { default_fuzzy_edits }
    }

    /// An empty query string produces an empty result, not an error.
    pub fn parse(&self, input: &str) -> Result<Option<QueryNode>> {
        let mut statements = Vec::new();
        for line in input.split(['\n', '\r']) {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            statements.push(self.parse_statement(line)?);
        }

        let mut chain: Option<QueryNode> = None;
        while let Some(mut node) = statements.pop() {
            node.next = chain.take().map(Box::new);
            chain = Some(node);
        }
        Ok(chain)
    }

    fn parse_statement(&self, line: &str) -> Result<QueryNode> {
        let (rest_input, (op, field, delim)) = statement_head(line)
            .map_err(|_| Error::Parse(format!("malformed statement: {line}")))?;

        let op = match op {
            Some('+') => Op::And,
            Some('-') => Op::Not,
            _ => Op::Or,
        };

        match delim {
            ':' => {
                let (value, modifier) = parse_value(rest_input);
                let terms = tokenize_value(&value);
                Ok(build_statement(op, field, terms, modifier))
            }
            '<' => Ok(QueryNode::new(op, field, rest_input.trim(), Modifier::Range(RangeBound::Upper))),
            '>' => Ok(QueryNode::new(op, field, rest_input.trim(), Modifier::Range(RangeBound::Lower))),
            _ => unreachable!("statement_head only matches ':', '<', '>'"),
        }
    }
}

fn statement_head(input: &str) -> IResult<&str, (Option<char>, &str, char)> {
    let (input, op) = opt(one_of("+-"))(input)?;
    let (input, field) = take_while1(|c: char| c.is_alphanumeric() || c == '_')(input)?;
    let (input, delim) = one_of(":<>")(input)?;
    Ok((input, (op, field, delim)))
}

/// Strips the `~` (fuzzy) or `*` (prefix) modifier suffix, or unwraps a
/// `\…\`-escaped verbatim value (used for timestamps containing `:`).
fn parse_value(input: &str) -> (String, Modifier) {
    let trimmed = input.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('\\') && trimmed.ends_with('\\') {
        return (trimmed[1..trimmed.len() - 1].to_string(), Modifier::Exact);
    }
    if let Some(stripped) = trimmed.strip_suffix('~') {
        return (stripped.to_string(), Modifier::Fuzzy);
    }
    if let Some(stripped) = trimmed.strip_suffix('*') {
        return (stripped.to_string(), Modifier::Prefix);
    }
    (trimmed.to_string(), Modifier::Exact)
}

fn tokenize_value(value: &str) -> Vec<String> {
    let terms: Vec<String> = value.split_whitespace().map(str::to_string).collect();
    if terms.is_empty() {
        vec![value.to_string()]
    } else {
        terms
    }
}

fn build_statement(op: Op, field: &str, terms: Vec<String>, modifier: Modifier) -> QueryNode {
    let mut iter = terms.into_iter();
    let first = iter.next().unwrap_or_default();
    let mut node = QueryNode::new(op, field, first, modifier.clone());

    let mut tail = &mut node.then;
    for term in iter {
        let next = Box::new(QueryNode::new(Op::And, field, term, modifier.clone()));
        *tail = Some(next);
        tail = &mut tail.as_mut().unwrap().then;
    }
    node
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_query_is_empty_not_error() {
        let parser = QueryParser::default();
        assert!(parser.parse("").unwrap().is_none());
    }

    #[test]
    fn exact_field_value() {
        let parser = QueryParser::default();
        let node = parser.parse("title:rust").unwrap().unwrap();
        assert_eq!(node.field, "title");
        assert_eq!(node.value, "rust");
        assert_eq!(node.modifier, Modifier::Exact);
    }

    #[test]
    fn operators_and_chaining() {
        let parser = QueryParser::default();
        let chain = parser.parse("title:rust\n+body:fast\n-tag:deprecated").unwrap().unwrap();
        let ops: Vec<Op> = chain.iter_statements().map(|n| n.op).collect();
        assert_eq!(ops, vec![Op::Or, Op::And, Op::Not]);
    }

    #[test]
    fn fuzzy_and_prefix_modifiers() {
        let parser = QueryParser::default();
        let fuzzy = parser.parse("title:rost~").unwrap().unwrap();
        assert_eq!(fuzzy.modifier, Modifier::Fuzzy);
        assert_eq!(fuzzy.value, "rost");

        let prefix = parser.parse("title:rus*").unwrap().unwrap();
        assert_eq!(prefix.modifier, Modifier::Prefix);
        assert_eq!(prefix.value, "rus");
    }

    #[test]
    fn range_forms_parse_without_colon() {
        let parser = QueryParser::default();
        let chain = parser.parse("price>10\n+price<100").unwrap().unwrap();
        let stmts: Vec<&QueryNode> = chain.iter_statements().collect();
        assert_eq!(stmts[0].modifier, Modifier::Range(RangeBound::Lower));
        assert_eq!(stmts[1].modifier, Modifier::Range(RangeBound::Upper));
    }

    #[test]
    fn escaped_value_passes_through_verbatim() {
        let parser = QueryParser::default();
        let node = parser.parse(r"_created:\2024-01-01T00:00:00\").unwrap().unwrap();
        assert_eq!(node.value, "2024-01-01T00:00:00");
    }

    #[test]
    fn multi_term_value_threads_through_then() {
        let parser = QueryParser::default();
        let node = parser.parse("body:rust programming").unwrap().unwrap();
        let terms: Vec<&str> = node.iter_terms().map(|n| n.value.as_str()).collect();
        assert_eq!(terms, vec!["rust", "programming"]);
    }

    #[test]
    fn missing_colon_is_parse_error() {
        let parser = QueryParser::default();
        assert!(parser.parse("title rust").is_err());
    }
}
