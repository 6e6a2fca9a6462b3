//! Ranks DOM candidates for an element description and emits a primary
//! CSS selector with ordered fallbacks.

pub mod candidates;
pub mod scoring;

pub use self::candidates::{harvest, ElementCandidate};

use self::scoring::{
    context_score, exact_score, fuzzy_score, positional_pick, positional_word, priority, tokenize,
};

const EXACT_THRESHOLD: f32 = 0.7;
const FUZZY_THRESHOLD: f32 = 0.3;
const CONTEXT_THRESHOLD: f32 = 0.4;
const POSITION_CONFIDENCE: f32 = 0.6;
/// Loose bar for membership in the positional strategy's working set.
const POSITION_FUZZY_FLOOR: f32 = 0.2;

/// The resolution result: a primary selector, up to three fallbacks and a
/// search text for text-based retry. An empty plan is not an error; the
/// executor turns it into a structural failure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectorPlan {
    pub primary: Option<String>,
    pub fallbacks: Vec<String>,
    pub search_text: Option<String>,
    pub confidence: f32,
}

impl SelectorPlan {
    pub fn is_empty(&self) -> bool {
        self.primary.is_none()
    }

    /// Primary first, then fallbacks.
    pub fn selectors(&self) -> Vec<&str> {
        self.primary
            .iter()
            .map(String::as_str)
            .chain(self.fallbacks.iter().map(String::as_str))
            .collect()
    }
}

pub struct SelectorEngine;

impl SelectorEngine {
    /// Resolve an element description against harvested candidates.
    /// Pure; strategy order is exact, fuzzy, context, position.
    pub fn resolve(description: &str, candidates: &[ElementCandidate]) -> SelectorPlan {
        let tokens = tokenize(description);
        let search_text = if tokens.is_empty() {
            None
        } else {
            Some(tokens.join(" "))
        };

        if candidates.is_empty() {
            return SelectorPlan {
                search_text,
                ..Default::default()
            };
        }

        let pick = Self::rank(description, &tokens, candidates);

        match pick {
            Some((index, confidence)) => {
                let mut selectors = derive_selectors(&candidates[index]);
                if selectors.is_empty() {
                    return SelectorPlan {
                        search_text,
                        ..Default::default()
                    };
                }
                let primary = selectors.remove(0);
                selectors.truncate(3);
                SelectorPlan {
                    primary: Some(primary),
                    fallbacks: selectors,
                    search_text,
                    confidence,
                }
            }
            None => SelectorPlan {
                search_text,
                ..Default::default()
            },
        }
    }

    fn rank(
        description: &str,
        tokens: &[String],
        candidates: &[ElementCandidate],
    ) -> Option<(usize, f32)> {
        let best_by = |score_fn: &dyn Fn(&ElementCandidate) -> f32| -> Option<(usize, f32)> {
            candidates
                .iter()
                .enumerate()
                .map(|(i, c)| (i, score_fn(c)))
                .max_by(|(ai, a), (bi, b)| {
                    a.partial_cmp(b)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| {
                            priority(&candidates[*ai]).cmp(&priority(&candidates[*bi]))
                        })
                })
        };

        // 1. Exact semantic.
        if let Some((i, score)) = best_by(&|c| exact_score(tokens, c)) {
            if score > EXACT_THRESHOLD {
                return Some((i, score));
            }
        }

        // 2. Fuzzy semantic.
        if let Some((i, score)) = best_by(&|c| fuzzy_score(description, tokens, c)) {
            if score > FUZZY_THRESHOLD {
                return Some((i, score.min(1.0)));
            }
        }

        // 3. Context-aware.
        if let Some((i, score)) = best_by(&|c| context_score(description, tokens, c)) {
            if score > CONTEXT_THRESHOLD {
                return Some((i, score.min(1.0)));
            }
        }

        // 4. Position-based.
        if let Some(word) = positional_word(description) {
            let mut passing: Vec<usize> = candidates
                .iter()
                .enumerate()
                .filter(|(_, c)| {
                    tokens.is_empty()
                        || fuzzy_score(description, tokens, c) >= POSITION_FUZZY_FLOOR
                })
                .map(|(i, _)| i)
                .collect();
            // The axis alone has to decide when no candidate matches
            // semantically.
            if passing.is_empty() {
                passing = (0..candidates.len()).collect();
            }
            if let Some(i) = positional_pick(word, candidates, &passing) {
                return Some((i, POSITION_CONFIDENCE));
            }
        }

        None
    }
}

/// All derivable CSS selectors for a candidate, most specific first.
pub fn derive_selectors(c: &ElementCandidate) -> Vec<String> {
    let mut selectors = Vec::new();
    if !c.id.is_empty() {
        selectors.push(format!("#{}", css_escape(&c.id)));
    }
    if !c.test_id.is_empty() {
        selectors.push(format!("[data-testid=\"{}\"]", c.test_id));
    }
    if !c.name.is_empty() {
        selectors.push(format!("{}[name=\"{}\"]", c.tag, c.name));
    }
    if !c.placeholder.is_empty() {
        selectors.push(format!("{}[placeholder=\"{}\"]", c.tag, c.placeholder));
    }
    if !c.aria_label.is_empty() {
        selectors.push(format!("[aria-label=\"{}\"]", c.aria_label));
    }
    if let Some(first_class) = c.class_name.split_whitespace().next() {
        selectors.push(format!("{}.{}", c.tag, css_escape(first_class)));
    }
    if !c.input_type.is_empty() {
        selectors.push(format!("{}[type=\"{}\"]", c.tag, c.input_type));
    }
    if c.nth_of_type > 0 {
        selectors.push(format!("{}:nth-of-type({})", c.tag, c.nth_of_type));
    }
    selectors
}

/// Escape characters CSS identifiers cannot carry raw.
fn css_escape(ident: &str) -> String {
    ident
        .chars()
        .flat_map(|ch| {
            if ch.is_alphanumeric() || ch == '-' || ch == '_' {
                vec![ch]
            } else {
                vec!['\\', ch]
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn login_page() -> Vec<ElementCandidate> {
        vec![
            ElementCandidate {
                tag: "input".into(),
                id: "username".into(),
                name: "username".into(),
                input_type: "text".into(),
                placeholder: "Username".into(),
                y: 180.0,
                width: 200.0,
                height: 30.0,
                tabindex: 0,
                nth_of_type: 1,
                ..Default::default()
            },
            ElementCandidate {
                tag: "input".into(),
                id: "pass".into(),
                name: "password".into(),
                input_type: "password".into(),
                y: 230.0,
                width: 200.0,
                height: 30.0,
                tabindex: 0,
                nth_of_type: 2,
                ..Default::default()
            },
            ElementCandidate {
                tag: "button".into(),
                text: "Sign in".into(),
                class_name: "btn btn-primary".into(),
                input_type: "submit".into(),
                clickable: true,
                y: 280.0,
                width: 100.0,
                height: 40.0,
                tabindex: 0,
                nth_of_type: 1,
                ..Default::default()
            },
        ]
    }

    #[test]
    fn exact_id_match_wins() {
        let plan = SelectorEngine::resolve("type alice in username field", &login_page());
        assert_eq!(plan.primary.as_deref(), Some("#username"));
        assert!(plan.confidence > 0.7);
        assert!(!plan.fallbacks.is_empty());
    }

    #[test]
    fn fuzzy_text_match_finds_the_button() {
        let plan = SelectorEngine::resolve("click Sign in", &login_page());
        assert_eq!(plan.primary.as_deref(), Some("button.btn"));
    }

    #[test]
    fn login_intent_reaches_the_password_input() {
        let plan = SelectorEngine::resolve("click password input to login", &login_page());
        assert!(plan.primary.is_some());
    }

    #[test]
    fn empty_candidates_yield_an_empty_plan() {
        let plan = SelectorEngine::resolve("click Sign in", &[]);
        assert!(plan.is_empty());
        assert!(plan.fallbacks.is_empty());
        assert_eq!(plan.search_text.as_deref(), Some("sign"));
    }

    #[test]
    fn no_match_yields_an_empty_plan_not_an_error() {
        let candidates = vec![ElementCandidate {
            tag: "a".into(),
            text: "Imprint".into(),
            nth_of_type: 1,
            ..Default::default()
        }];
        let plan = SelectorEngine::resolve("click checkout", &candidates);
        assert!(plan.is_empty());
    }

    #[test]
    fn positional_strategy_picks_the_extremum() {
        let mut candidates = login_page();
        // Strip identifying attributes so earlier strategies stay quiet.
        for c in &mut candidates {
            c.id.clear();
            c.name.clear();
            c.text.clear();
            c.placeholder.clear();
            c.class_name.clear();
        }
        let plan = SelectorEngine::resolve("click the first input", &candidates);
        assert!(plan.primary.is_some());
        assert!((plan.confidence - 0.6).abs() < f32::EPSILON);
    }

    #[test]
    fn derived_selectors_are_ordered_by_specificity() {
        let selectors = derive_selectors(&login_page()[0]);
        assert_eq!(selectors[0], "#username");
        assert!(selectors.contains(&"input[name=\"username\"]".to_string()));
        assert!(selectors.contains(&"input:nth-of-type(1)".to_string()));
    }
}
