//! Grammar files: one `[Intent]` section per intent
//!
//! Inside a section, `name = body` lines define rules local to the intent and
//! every other line is a sentence template.

use crate::error::{GrammarError, Result};
use crate::template::{parse_template, Reference, Template};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// All sentence templates and local rules of one intent
#[derive(Debug, Clone, PartialEq)]
pub struct Grammar {
    pub intent: String,
    pub sentences: Vec<Template>,
    pub rules: BTreeMap<String, Template>,
}

impl Grammar {
    pub fn new(intent: impl Into<String>) -> Self {
        Self {
            intent: intent.into(),
            sentences: Vec::new(),
            rules: BTreeMap::new(),
        }
    }

    /// The intent's template: any one of its sentences
    pub fn template(&self) -> Template {
        Template::Alternation(self.sentences.clone())
    }

    /// References made by the sentences and local rules, in first-occurrence order
    pub fn references(&self) -> Vec<Reference> {
        let mut refs: Vec<Reference> = Vec::new();
        let templates = self.sentences.iter().chain(self.rules.values());
        for reference in templates.flat_map(Template::references) {
            if !refs.contains(&reference) {
                refs.push(reference);
            }
        }
        refs
    }

    /// Apply a word transform to every sentence and rule
    pub fn map_words(&mut self, transform: &dyn Fn(&str) -> String) {
        for template in self.sentences.iter_mut().chain(self.rules.values_mut()) {
            template.map_words(transform);
        }
    }
}

/// Parse a grammar file's text.
///
/// When `whitelist` is given, only the named intents are kept; other sections
/// are still checked for syntax errors.
pub fn parse_ini(text: &str, whitelist: Option<&BTreeSet<String>>) -> Result<Vec<Grammar>> {
    let section_re = Regex::new(r"^\[([^\[\]]*)\]$")?;
    let rule_re = Regex::new(r"^([A-Za-z_][A-Za-z0-9_\-]*)\s*=\s*(.*)$")?;
    // Section names become artifact file names and `Intent.rule` prefixes
    let name_re = Regex::new(r"^[A-Za-z_][A-Za-z0-9_\-]*$")?;

    let mut grammars: Vec<Grammar> = Vec::new();
    let mut seen = BTreeSet::new();

    for (index, raw_line) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(caps) = section_re.captures(line) {
            let intent = caps[1].trim().to_string();
            if !name_re.is_match(&intent) {
                return Err(GrammarError::syntax(
                    &intent,
                    line_no,
                    format!("invalid section name {line}"),
                ));
            }
            if !seen.insert(intent.clone()) {
                return Err(GrammarError::syntax(&intent, line_no, "duplicate intent section"));
            }
            grammars.push(Grammar::new(intent));
            continue;
        }

        let Some(grammar) = grammars.last_mut() else {
            return Err(GrammarError::syntax(
                "",
                line_no,
                "sentence outside of an [Intent] section",
            ));
        };

        if let Some(caps) = rule_re.captures(line) {
            let name = caps[1].to_string();
            let body = caps[2].trim();
            if body.is_empty() {
                return Err(GrammarError::syntax(
                    &grammar.intent,
                    line_no,
                    format!("rule {name} has an empty body"),
                ));
            }
            let template = parse_template(body, &grammar.intent, line_no)?;
            if grammar.rules.insert(name.clone(), template).is_some() {
                return Err(GrammarError::syntax(
                    &grammar.intent,
                    line_no,
                    format!("duplicate rule {name}"),
                ));
            }
        } else {
            let template = parse_template(line, &grammar.intent, line_no)?;
            grammar.sentences.push(template);
        }
    }

    if let Some(whitelist) = whitelist {
        grammars.retain(|grammar| whitelist.contains(&grammar.intent));
    }

    tracing::debug!("Parsed {} intent grammar(s)", grammars.len());
    Ok(grammars)
}

/// Read and parse a grammar file
pub fn load_ini(path: impl AsRef<Path>, whitelist: Option<&BTreeSet<String>>) -> Result<Vec<Grammar>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|e| GrammarError::Io(format!("reading {}: {e}", path.display())))?;
    parse_ini(&text, whitelist)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::RuleName;

    const SENTENCES: &str = r#"
# Lights
[SetLight]
state = (on | off){state}
turn <state> the $room light

; clock
[GetTime]
what time is it
tell me the time
"#;

    #[test]
    fn test_sections_rules_and_sentences() {
        let grammars = parse_ini(SENTENCES, None).unwrap();
        assert_eq!(grammars.len(), 2);

        let set_light = &grammars[0];
        assert_eq!(set_light.intent, "SetLight");
        assert_eq!(set_light.sentences.len(), 1);
        assert!(set_light.rules.contains_key("state"));
        assert_eq!(
            set_light.references(),
            vec![
                Reference::Rule(RuleName::local("state")),
                Reference::Slot("room".into()),
            ]
        );

        assert_eq!(grammars[1].intent, "GetTime");
        assert_eq!(grammars[1].sentences.len(), 2);
        assert!(grammars[1].references().is_empty());
    }

    #[test]
    fn test_whitelist_keeps_named_intents() {
        let whitelist: BTreeSet<String> = ["GetTime".to_string()].into_iter().collect();
        let grammars = parse_ini(SENTENCES, Some(&whitelist)).unwrap();
        assert_eq!(grammars.len(), 1);
        assert_eq!(grammars[0].intent, "GetTime");
    }

    #[test]
    fn test_errors_carry_intent_and_line() {
        let err = parse_ini("[A]\nfine\n[B]\nturn (on | off the light\n", None).unwrap_err();
        match err {
            GrammarError::Syntax { intent, line, .. } => {
                assert_eq!(intent, "B");
                assert_eq!(line, 4);
            }
            other => panic!("unexpected error {other}"),
        }

        assert!(matches!(
            parse_ini("orphan sentence\n", None),
            Err(GrammarError::Syntax { line: 1, .. })
        ));
        assert!(matches!(
            parse_ini("[A]\nx\n[A]\ny\n", None),
            Err(GrammarError::Syntax { line: 3, .. })
        ));
        assert!(matches!(
            parse_ini("[A]\nr = a\nr = b\n", None),
            Err(GrammarError::Syntax { line: 3, .. })
        ));
    }

    #[test]
    fn test_section_names_are_identifiers() {
        for bad in ["[]", "[Set Light]", "[../escape]", "[A.b]", "[$room]", "[1st]"] {
            let text = format!("{bad}\nhello\n");
            assert!(
                matches!(parse_ini(&text, None), Err(GrammarError::Syntax { line: 1, .. })),
                "{bad} should be rejected"
            );
        }
        let grammars = parse_ini("[Set_Light-2]\nhello\n", None).unwrap();
        assert_eq!(grammars[0].intent, "Set_Light-2");
    }
}
