//! Stable numeric identifiers for interactable page elements.
//!
//! A scan walks the live DOM, filters candidates by visibility and size,
//! assigns ids in query order and writes them back onto the elements as a
//! queryable attribute, so later executor calls can resolve id -> live handle
//! without re-scanning. A snapshot is valid until the next navigation or
//! structural mutation; callers must re-scan after either.

use std::collections::BTreeMap;

use headless_chrome::Tab;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RegistryConfig;
use crate::errors::{AgentError, Result};

/// Attribute carrying the assigned element id on the page.
pub const ELEMENT_ID_ATTR: &str = "agent-element-id";
/// Attribute carrying the derived label on the page.
pub const ELEMENT_LABEL_ATTR: &str = "agent-interactable";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagKind {
    Link,
    Button,
    Input,
    TextArea,
    Select,
    /// Generic element qualifying through an ARIA role or inline click handler.
    Role,
}

impl TagKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "a" => TagKind::Link,
            "button" => TagKind::Button,
            "input" => TagKind::Input,
            "textarea" => TagKind::TextArea,
            "select" => TagKind::Select,
            _ => TagKind::Role,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractableElement {
    pub id: u32,
    pub kind: TagKind,
    pub label: String,
    pub bounding_box: BoundingBox,
    pub is_visible: bool,
}

/// One element record as emitted by the injected scan script.
#[derive(Debug, Clone, Deserialize)]
pub struct ScanRecord {
    pub id: u32,
    pub tag: String,
    pub label: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub visible: bool,
}

/// Point-in-time, id-indexed view of the interactable elements on a page.
/// Iteration order is id order, which is scan order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ElementMap {
    elements: BTreeMap<u32, InteractableElement>,
}

impl ElementMap {
    /// Build a map from scan records, enforcing the snapshot invariant: only
    /// visible records whose rendered box exceeds the minimum size enter the
    /// map.
    pub fn from_records(records: Vec<ScanRecord>, min_size: f64) -> Self {
        let mut elements = BTreeMap::new();
        for record in records {
            if !record.visible || record.width <= min_size || record.height <= min_size {
                continue;
            }
            elements.insert(
                record.id,
                InteractableElement {
                    id: record.id,
                    kind: TagKind::from_tag(&record.tag),
                    label: record.label,
                    bounding_box: BoundingBox {
                        x: record.x,
                        y: record.y,
                        width: record.width,
                        height: record.height,
                    },
                    is_visible: record.visible,
                },
            );
        }
        Self { elements }
    }

    pub fn get(&self, id: u32) -> Option<&InteractableElement> {
        self.elements.get(&id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.elements.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &InteractableElement> {
        self.elements.values()
    }
}

const SCAN_CANDIDATE_SELECTOR: &str = "a, button, input[type='submit'], input[type='button'], \
     input[type='text'], input[type='password'], input[type='email'], textarea, select, \
     [role='button'], [role='link'], [role='menuitem'], [role='tab'], [role='checkbox'], \
     [role='radio'], [role='switch'], [role='option'], [onclick]";

// Runs in-page as one pass: clear stale markers, filter candidates by the
// visibility cascade and viewport intersection, assign ids in query order,
// write markers back, return the records as a JSON string.
const SCAN_SCRIPT: &str = r#"
(function() {
    document.querySelectorAll('[%ID_ATTR%]').forEach(function(el) {
        el.removeAttribute('%ID_ATTR%');
        el.removeAttribute('%LABEL_ATTR%');
    });

    function isStyleVisible(el) {
        var style = window.getComputedStyle(el);
        return style.width !== '0' && style.height !== '0' && style.opacity !== '0' &&
            style.display !== 'none' && style.visibility !== 'hidden';
    }

    function isInViewport(el) {
        var rect = el.getBoundingClientRect();
        return rect.top >= 0 && rect.left >= 0 &&
            rect.bottom <= (window.innerHeight || document.documentElement.clientHeight) &&
            rect.right <= (window.innerWidth || document.documentElement.clientWidth);
    }

    function isVisible(el) {
        var node = el;
        while (node) {
            if (!isStyleVisible(node)) return false;
            node = node.parentElement;
        }
        return isInViewport(el);
    }

    function deriveLabel(el) {
        var label = (el.textContent || '').trim();
        if (!label) {
            label = el.getAttribute('aria-label') || el.getAttribute('title') ||
                el.getAttribute('name') || el.getAttribute('id') ||
                el.getAttribute('placeholder') || '';
        }
        label = label.replace(/[^a-zA-Z0-9 ]/g, '').trim();
        if (!label) {
            label = '[' + el.tagName.toUpperCase() + ']';
        }
        if (label.length > %MAX_LABEL%) {
            label = label.substring(0, %MAX_LABEL%) + '...';
        }
        return label;
    }

    var records = [];
    var nextId = 1;
    document.querySelectorAll("%SELECTOR%").forEach(function(el) {
        var rect = el.getBoundingClientRect();
        if (rect.width <= %MIN_SIZE% || rect.height <= %MIN_SIZE%) return;
        if (!isVisible(el)) return;

        var id = nextId++;
        var label = deriveLabel(el);
        el.setAttribute('%ID_ATTR%', id);
        el.setAttribute('%LABEL_ATTR%', label);
        if (%HIGHLIGHT%) {
            el.style.outline = '2px solid red';
            el.style.backgroundColor = 'rgba(255, 0, 0, 0.1)';
        }

        records.push({
            id: id,
            tag: el.tagName.toLowerCase(),
            label: label,
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
            visible: true
        });
    });

    return JSON.stringify(records);
})()
"#;

/// Owns the current element map for one page and the id -> live element
/// binding written onto the DOM. Exactly one map is current at a time;
/// a scan replaces the previous map wholesale.
pub struct ElementRegistry {
    config: RegistryConfig,
    current: ElementMap,
}

impl ElementRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            current: ElementMap::default(),
        }
    }

    pub fn current(&self) -> &ElementMap {
        &self.current
    }

    /// Re-scan the page and replace the current map. Fails with `ScanFailed`
    /// when the page is mid-navigation rather than returning a partial map;
    /// callers retry once navigation settles.
    pub async fn scan(&mut self, tab: &Tab) -> Result<&ElementMap> {
        let ready_state = tab
            .evaluate("document.readyState", false)
            .map_err(|e| AgentError::ScanFailed(e.to_string()))?
            .value
            .and_then(|v| v.as_str().map(|s| s.to_string()))
            .unwrap_or_default();

        if ready_state == "loading" {
            return Err(AgentError::ScanFailed(
                "page is mid-navigation (readyState=loading)".to_string(),
            ));
        }

        let script = self.scan_script();
        let result = tab
            .evaluate(&script, false)
            .map_err(|e| AgentError::ScanFailed(e.to_string()))?;

        let payload = result
            .value
            .and_then(|v| v.as_str().map(|s| s.to_string()))
            .ok_or_else(|| AgentError::ScanFailed("scan script returned no payload".to_string()))?;

        let records: Vec<ScanRecord> = serde_json::from_str(&payload)?;
        self.current = ElementMap::from_records(records, self.config.min_element_size);
        debug!(elements = self.current.len(), "element map refreshed");
        Ok(&self.current)
    }

    /// CSS selector resolving an assigned id back to its live element.
    pub fn selector_for(id: u32) -> String {
        format!("[{}='{}']", ELEMENT_ID_ATTR, id)
    }

    fn scan_script(&self) -> String {
        SCAN_SCRIPT
            .replace("%ID_ATTR%", ELEMENT_ID_ATTR)
            .replace("%LABEL_ATTR%", ELEMENT_LABEL_ATTR)
            .replace("%SELECTOR%", SCAN_CANDIDATE_SELECTOR)
            .replace("%MIN_SIZE%", &self.config.min_element_size.to_string())
            .replace("%MAX_LABEL%", &self.config.max_label_len.to_string())
            .replace(
                "%HIGHLIGHT%",
                if self.config.highlight_elements {
                    "true"
                } else {
                    "false"
                },
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u32, tag: &str, width: f64, height: f64, visible: bool) -> ScanRecord {
        ScanRecord {
            id,
            tag: tag.to_string(),
            label: format!("element {}", id),
            x: 10.0,
            y: 20.0,
            width,
            height,
            visible,
        }
    }

    #[test]
    fn map_construction_is_deterministic() {
        let records = || {
            vec![
                record(1, "a", 100.0, 20.0, true),
                record(2, "input", 200.0, 30.0, true),
                record(3, "button", 80.0, 25.0, true),
            ]
        };
        let first = ElementMap::from_records(records(), 5.0);
        let second = ElementMap::from_records(records(), 5.0);
        assert_eq!(first, second);
        let ids: Vec<u32> = first.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn invisible_and_undersized_records_never_enter_the_map() {
        let records = vec![
            record(1, "a", 100.0, 20.0, true),
            record(2, "button", 100.0, 20.0, false),
            record(3, "input", 4.0, 4.0, true),
            record(4, "select", 100.0, 2.0, true),
        ];
        let map = ElementMap::from_records(records, 5.0);
        assert_eq!(map.len(), 1);
        assert!(map.contains(1));
        assert!(!map.contains(2));
        assert!(!map.contains(3));
        assert!(!map.contains(4));
    }

    #[test]
    fn tag_kinds_cover_the_candidate_set() {
        assert_eq!(TagKind::from_tag("a"), TagKind::Link);
        assert_eq!(TagKind::from_tag("button"), TagKind::Button);
        assert_eq!(TagKind::from_tag("input"), TagKind::Input);
        assert_eq!(TagKind::from_tag("textarea"), TagKind::TextArea);
        assert_eq!(TagKind::from_tag("select"), TagKind::Select);
        assert_eq!(TagKind::from_tag("div"), TagKind::Role);
        assert_eq!(TagKind::from_tag("span"), TagKind::Role);
    }

    #[test]
    fn selector_round_trips_the_id_attribute() {
        assert_eq!(
            ElementRegistry::selector_for(7),
            "[agent-element-id='7']"
        );
    }

    #[test]
    fn scan_script_interpolates_config() {
        let registry = ElementRegistry::new(RegistryConfig {
            highlight_elements: false,
            min_element_size: 8.0,
            max_label_len: 30,
        });
        let script = registry.scan_script();
        assert!(script.contains("rect.width <= 8"));
        assert!(script.contains("label.length > 30"));
        assert!(script.contains("if (false)"));
        assert!(!script.contains('%'));
    }
}
