//! Sheet rule resolution.
//!
//! A [`RuleSet`] holds the Excel print rules in declaration order. For any sheet
//! name exactly one rule is selected: matching specific rules are preferred over
//! default rules, then the lowest priority wins, then the first declared.

use crate::config::{PrintConfigRule, ScalingMode};
use crate::error::{ConversionError, Result};
use regex::Regex;

/// Compiled sheet-name pattern.
#[derive(Debug, Clone)]
struct SheetPattern {
    source: String,
    regex: Regex,
}

impl SheetPattern {
    fn compile(pattern: &str) -> Result<Self> {
        if pattern.trim().is_empty() {
            return Err(ConversionError::Config(
                "sheet pattern must not be empty".to_string(),
            ));
        }
        let mut expr = String::with_capacity(pattern.len() + 8);
        expr.push('^');
        for ch in pattern.chars() {
            match ch {
                '*' => expr.push_str(".*"),
                '?' => expr.push('.'),
                other => expr.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
            }
        }
        expr.push('$');
        let regex = Regex::new(&expr).map_err(|e| {
            ConversionError::Config(format!("invalid sheet pattern {pattern:?}: {e}"))
        })?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    fn matches(&self, sheet: &str) -> bool {
        self.regex.is_match(sheet)
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: PrintConfigRule,
    patterns: Option<Vec<SheetPattern>>,
}

/// Validated, read-only rule set.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    /// Validate the rules and compile their sheet patterns.
    pub fn new(rules: Vec<PrintConfigRule>) -> Result<Self> {
        if !rules.iter().any(PrintConfigRule::is_default) {
            return Err(ConversionError::Config(
                "excel rules need at least one default rule (a rule without `sheets`)".to_string(),
            ));
        }

        let mut compiled = Vec::with_capacity(rules.len());
        for (index, rule) in rules.into_iter().enumerate() {
            validate_rule(index, &rule)?;
            let patterns = match &rule.sheets {
                Some(sheets) if sheets.is_empty() => {
                    return Err(ConversionError::Config(format!(
                        "rule #{index} has an empty `sheets` list"
                    )));
                }
                Some(sheets) => Some(
                    sheets
                        .iter()
                        .map(|p| SheetPattern::compile(p))
                        .collect::<Result<Vec<_>>>()?,
                ),
                None => None,
            };
            compiled.push(CompiledRule { rule, patterns });
        }

        Ok(Self { rules: compiled })
    }

    /// Select the rule for a sheet.
    pub fn resolve(&self, sheet_name: &str) -> &PrintConfigRule {
        let specific = self.best(|c| {
            c.patterns
                .as_ref()
                .is_some_and(|ps| ps.iter().any(|p| p.matches(sheet_name)))
        });
        // `new` guarantees at least one default rule.
        specific
            .or_else(|| self.best(|c| c.patterns.is_none()))
            .unwrap_or(&self.rules[0].rule)
    }

    /// Rules in declaration order.
    pub fn rules(&self) -> impl Iterator<Item = &PrintConfigRule> {
        self.rules.iter().map(|c| &c.rule)
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Always false for a validated set.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Sheet patterns of the rule at `index`, as written.
    pub fn patterns(&self, index: usize) -> Option<Vec<&str>> {
        self.rules
            .get(index)?
            .patterns
            .as_ref()
            .map(|ps| ps.iter().map(|p| p.source.as_str()).collect())
    }

    fn best(&self, filter: impl Fn(&CompiledRule) -> bool) -> Option<&PrintConfigRule> {
        self.rules
            .iter()
            .enumerate()
            .filter(|(_, c)| filter(c))
            .min_by_key(|(index, c)| (c.rule.priority, *index))
            .map(|(_, c)| &c.rule)
    }
}

fn validate_rule(index: usize, rule: &PrintConfigRule) -> Result<()> {
    if rule.scaling == ScalingMode::Custom {
        match rule.scaling_percent {
            None => {
                return Err(ConversionError::Config(format!(
                    "rule #{index} uses custom scaling without `scaling_percent`"
                )))
            }
            Some(p) if !(10..=400).contains(&p) => {
                return Err(ConversionError::Config(format!(
                    "rule #{index} scaling_percent must be between 10 and 400, got {p}"
                )))
            }
            Some(_) => {}
        }
    }
    if rule.rows_per_page == Some(0) {
        return Err(ConversionError::Config(format!(
            "rule #{index} rows_per_page must be at least 1"
        )));
    }
    if rule.columns_per_page == Some(0) {
        return Err(ConversionError::Config(format!(
            "rule #{index} columns_per_page must be at least 1"
        )));
    }
    Ok(())
}
