//! DOM candidate harvesting.
//!
//! One JS evaluation returns structured descriptors for every interactive
//! element in the viewport or within one viewport-height below it. The
//! engine never sees raw DOM nodes.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::browser::Driver;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ElementCandidate {
    pub tag: String,
    pub id: String,
    pub name: String,
    pub class_name: String,
    pub test_id: String,
    pub aria_label: String,
    pub placeholder: String,
    pub input_type: String,
    pub role: String,
    pub text: String,
    pub value: String,
    pub title: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub clickable: bool,
    pub tabindex: i32,
    /// 1-based position among same-tag siblings, for nth-of-type fallbacks.
    pub nth_of_type: u32,
}

impl ElementCandidate {
    /// Every textual attribute, for fuzzy matching.
    pub fn text_fields(&self) -> [&str; 8] {
        [
            &self.text,
            &self.placeholder,
            &self.value,
            &self.name,
            &self.id,
            &self.aria_label,
            &self.title,
            &self.class_name,
        ]
    }
}

const HARVEST_SCRIPT: &str = r#"
(function() {
    const limit = window.innerHeight * 2;
    const out = [];
    const nthCounter = new Map();
    const elements = document.querySelectorAll(
        'button, input, select, textarea, a, [role], [onclick], [tabindex]'
    );
    for (const el of elements) {
        const tag = el.tagName.toLowerCase();
        const nth = (nthCounter.get(tag) || 0) + 1;
        nthCounter.set(tag, nth);

        const rect = el.getBoundingClientRect();
        if (rect.width === 0 || rect.height === 0) continue;
        if (rect.top > limit || rect.bottom < 0) continue;
        const style = getComputedStyle(el);
        if (style.visibility === 'hidden' || style.display === 'none') continue;

        out.push({
            tag: tag,
            id: el.id || '',
            name: el.getAttribute('name') || '',
            className: (typeof el.className === 'string' ? el.className : '').trim(),
            testId: el.getAttribute('data-testid') || '',
            ariaLabel: el.getAttribute('aria-label') || '',
            placeholder: el.getAttribute('placeholder') || '',
            inputType: el.getAttribute('type') || '',
            role: el.getAttribute('role') || '',
            text: (el.innerText || el.textContent || '').trim().slice(0, 120),
            value: (el.value || '').slice(0, 120),
            title: el.getAttribute('title') || '',
            x: Math.round(rect.left),
            y: Math.round(rect.top),
            width: Math.round(rect.width),
            height: Math.round(rect.height),
            clickable: style.cursor === 'pointer' || tag === 'button' || tag === 'a',
            tabindex: el.tabIndex,
            nthOfType: nth
        });
    }
    return out;
})()
"#;

/// Collect candidates from the live page.
pub async fn harvest(driver: &dyn Driver) -> Result<Vec<ElementCandidate>> {
    let value = driver.evaluate(HARVEST_SCRIPT).await?;
    let candidates = serde_json::from_value(value)?;
    Ok(candidates)
}
