//! Context selectors and `<img>` discovery.
//!
//! [`locate_images`] scans the document once, keeping a stack of open
//! elements, so each `<img>` comes with the class tokens of every element
//! enclosing it. Optional end tags are implied the way browsers imply them:
//! `<li>` closes an open `<li>`, a block start tag closes an open `<p>`, and a
//! parent's end tag closes everything opened inside it. A leading `---` block
//! (Astro frontmatter) is skipped.
//!
//! If a start tag other than `<img>` never closes, the structure past it is
//! unknown: the document is scanned with a regex instead and ancestor classes
//! are unknown.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use tracing::warn;

use super::MarkupError;
use super::tag::{AttrList, ImgTag, LexError, Quote, lex_attrs, starts_img};

/// Where in a document a rule applies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ContextSelector {
    /// Some enclosing element carries this class token.
    Container(String),
    /// The `<img>` itself carries this class token.
    ImgClass(String),
    /// Anywhere in the document.
    Document,
}

impl ContextSelector {
    /// Whether this selector can be evaluated without ancestor information.
    pub fn needs_tree(&self) -> bool {
        matches!(self, ContextSelector::Container(_))
    }

    pub fn matches(&self, site: &ImgSite<'_>) -> bool {
        match self {
            ContextSelector::Document => true,
            ContextSelector::ImgClass(class) => site.tag.has_class(class),
            ContextSelector::Container(class) => site
                .ancestor_classes
                .as_ref()
                .is_some_and(|classes| classes.iter().any(|c| c == class)),
        }
    }
}

impl fmt::Display for ContextSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextSelector::Container(c) => write!(f, "container:{c}"),
            ContextSelector::ImgClass(c) => write!(f, "img-class:{c}"),
            ContextSelector::Document => f.write_str("document"),
        }
    }
}

impl FromStr for ContextSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "document" {
            return Ok(ContextSelector::Document);
        }
        let (kind, class) = s
            .split_once(':')
            .ok_or_else(|| format!("invalid context '{s}' (expected container:<class>, img-class:<class> or document)"))?;
        let class = class.trim();
        if class.is_empty() || class.contains(char::is_whitespace) {
            return Err(format!("invalid class name in context '{s}'"));
        }
        match kind {
            "container" => Ok(ContextSelector::Container(class.to_string())),
            "img-class" => Ok(ContextSelector::ImgClass(class.to_string())),
            other => Err(format!("unknown context kind '{other}'")),
        }
    }
}

impl TryFrom<String> for ContextSelector {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ContextSelector> for String {
    fn from(selector: ContextSelector) -> Self {
        selector.to_string()
    }
}

/// A lexed `<img>` and what surrounds it.
#[derive(Debug, Clone)]
pub struct ImgSite<'a> {
    pub tag: ImgTag<'a>,
    /// Class tokens of all enclosing elements. `None` in fallback mode.
    pub ancestor_classes: Option<Vec<String>>,
}

/// All `<img>` tags of a document, in document order.
#[derive(Debug, Clone)]
pub struct Located<'a> {
    pub sites: Vec<ImgSite<'a>>,
    /// Document structure was lost and the regex scan was used.
    pub fallback: bool,
    /// Tags that could not be lexed and were skipped.
    pub malformed: Vec<MarkupError>,
}

static IMG_OPEN: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"(?i-u)<img\b").expect("valid regex"));

/// Never have content, so never enclose anything.
const VOID: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Content is text up to the matching end tag.
const RAW_TEXT: &[&str] = &["script", "style", "textarea", "title"];

/// Start tags that close an open `<p>`.
const CLOSES_P: &[&str] = &[
    "address", "article", "aside", "blockquote", "dd", "details", "dialog", "div", "dl", "dt",
    "fieldset", "figcaption", "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6",
    "header", "hgroup", "hr", "li", "main", "menu", "nav", "ol", "p", "pre", "section", "table",
    "ul",
];

/// An open `<p>` is not closed from inside these.
const P_SCOPE: &[&str] = &[
    "button", "caption", "html", "object", "table", "td", "template", "th",
];

/// Start tags, the open elements they implicitly close, and the ancestors
/// that stop the search.
const IMPLIED: &[(&[&str], &[&str], &[&str])] = &[
    (&["li"], &["li"], &["ul", "ol", "menu"]),
    (&["dt", "dd"], &["dt", "dd"], &["dl"]),
    (&["option"], &["option"], &["select", "datalist", "optgroup"]),
    (&["optgroup"], &["optgroup", "option"], &["select"]),
    (&["tr"], &["tr", "td", "th"], &["table", "thead", "tbody", "tfoot"]),
    (&["td", "th"], &["td", "th"], &["tr", "table"]),
    (
        &["thead", "tbody", "tfoot"],
        &["thead", "tbody", "tfoot", "tr", "td", "th"],
        &["table"],
    ),
];

/// An element on the scope stack.
struct Open {
    name: String,
    classes: Vec<String>,
}

/// Find every lexable `<img>` in `html`. Malformed tags are skipped with a warning.
pub fn locate_images(html: &str) -> Located<'_> {
    match scan_scoped(html) {
        Some((sites, malformed)) => Located {
            sites,
            fallback: false,
            malformed,
        },
        None => {
            warn!("document structure lost, falling back to regex scan");
            scan_fallback(html)
        }
    }
}

/// Byte offset where the markup starts: past a leading `---` frontmatter block.
pub fn frontmatter_end(html: &str) -> usize {
    let mut lines = html.split_inclusive('\n');
    if lines.next().map(str::trim) != Some("---") {
        return 0;
    }
    let mut end = html.find('\n').map_or(html.len(), |i| i + 1);
    for line in lines {
        end += line.len();
        if line.trim() == "---" {
            return end;
        }
    }
    0
}

fn scan_scoped(html: &str) -> Option<(Vec<ImgSite<'_>>, Vec<MarkupError>)> {
    let bytes = html.as_bytes();
    let mut stack: Vec<Open> = Vec::new();
    let mut sites = Vec::new();
    let mut malformed = Vec::new();
    let mut pos = frontmatter_end(html);

    while let Some(found) = html[pos..].find('<') {
        let at = pos + found;
        let rest = &bytes[at..];
        if rest.starts_with(b"<!--") {
            pos = html[at + 4..]
                .find("-->")
                .map_or(html.len(), |end| at + 4 + end + 3);
            continue;
        }
        if rest.starts_with(b"<!") || rest.starts_with(b"<?") {
            pos = past(html, at, b'>');
            continue;
        }
        if starts_img(html, at) {
            match lex_at(html, at, &mut malformed) {
                Some(tag) => {
                    pos = at + tag.text.len();
                    let classes = stack.iter().flat_map(|o| o.classes.iter().cloned());
                    sites.push(ImgSite {
                        tag,
                        ancestor_classes: Some(classes.collect()),
                    });
                }
                None => pos = at + 1,
            }
            continue;
        }

        let closing = rest.get(1) == Some(&b'/');
        let name_start = at + 1 + usize::from(closing);
        let name_len = tag_name_len(&bytes[name_start..]);
        if name_len == 0 {
            pos = at + 1;
            continue;
        }
        let name = html[name_start..name_start + name_len].to_ascii_lowercase();
        if closing {
            pos = past(html, name_start, b'>');
            if let Some(i) = stack.iter().rposition(|o| o.name == name) {
                stack.truncate(i);
            }
            continue;
        }

        let list = match lex_attrs(rest, name_start + name_len - at) {
            Ok(list) => list,
            Err(LexError::StrayAngle) => {
                pos = at + 1;
                continue;
            }
            Err(reason) => {
                warn!(line = line_of(html, at), tag = %name, %reason, "start tag never closes");
                return None;
            }
        };
        pos = at + list.len;

        let implied = IMPLIED
            .iter()
            .filter(|(starts, ..)| starts.contains(&name.as_str()));
        for (_, closes, boundary) in implied {
            close_within(&mut stack, closes, boundary);
        }
        if CLOSES_P.contains(&name.as_str()) {
            close_within(&mut stack, &["p"], P_SCOPE);
        }
        if list.self_closing || VOID.contains(&name.as_str()) {
            continue;
        }
        if RAW_TEXT.contains(&name.as_str()) {
            pos = raw_text_end(html, pos, &name);
            continue;
        }
        let classes = class_tokens(&html[at..pos], &list);
        stack.push(Open { name, classes });
    }
    Some((sites, malformed))
}

/// Length of a tag name at the start of `bytes`; zero if none starts there.
fn tag_name_len(bytes: &[u8]) -> usize {
    if !bytes.first().is_some_and(u8::is_ascii_alphabetic) {
        return 0;
    }
    bytes
        .iter()
        .take_while(|&&b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b':'))
        .count()
}

/// Offset just past the next `byte` at or after `from`, or the end of input.
fn past(html: &str, from: usize, byte: u8) -> usize {
    html.as_bytes()[from..]
        .iter()
        .position(|&b| b == byte)
        .map_or(html.len(), |i| from + i + 1)
}

/// Offset of the `</name` that ends a raw-text element, or the end of input.
fn raw_text_end(html: &str, from: usize, name: &str) -> usize {
    let bytes = html.as_bytes();
    let mut pos = from;
    while let Some(i) = html[pos..].find("</") {
        let at = pos + i;
        let tail = &bytes[at + 2..];
        if tail.len() >= name.len() && tail[..name.len()].eq_ignore_ascii_case(name.as_bytes()) {
            return at;
        }
        pos = at + 2;
    }
    html.len()
}

/// Pop the outermost open element named in `closes`, unless a `boundary`
/// element sits above it.
fn close_within(stack: &mut Vec<Open>, closes: &[&str], boundary: &[&str]) {
    let mut cut = None;
    for (i, open) in stack.iter().enumerate().rev() {
        if boundary.contains(&open.name.as_str()) {
            break;
        }
        if closes.contains(&open.name.as_str()) {
            cut = Some(i);
        }
    }
    if let Some(i) = cut {
        stack.truncate(i);
    }
}

/// Literal `class` tokens of a lexed start tag.
fn class_tokens(text: &str, list: &AttrList) -> Vec<String> {
    list.attrs
        .iter()
        .find(|a| text[a.name.clone()].eq_ignore_ascii_case("class"))
        .filter(|a| a.quote != Some(Quote::Expression))
        .and_then(|a| a.value.clone())
        .map(|range| text[range].split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

fn lex_at<'a>(html: &'a str, offset: usize, malformed: &mut Vec<MarkupError>) -> Option<ImgTag<'a>> {
    if !starts_img(html, offset) {
        return None;
    }
    match ImgTag::lex(html, offset) {
        Ok(tag) => Some(tag),
        Err(reason) => {
            let line = line_of(html, offset);
            warn!(line, %reason, "skipping malformed <img> tag");
            malformed.push(MarkupError::MalformedTag { line, reason });
            None
        }
    }
}

fn scan_fallback(html: &str) -> Located<'_> {
    let start = frontmatter_end(html);
    let mut malformed = Vec::new();
    let sites = IMG_OPEN
        .find_iter(&html[start..])
        .filter_map(|m| lex_at(html, start + m.start(), &mut malformed))
        .map(|tag| ImgSite {
            tag,
            ancestor_classes: None,
        })
        .collect();
    Located {
        sites,
        fallback: true,
        malformed,
    }
}

/// 1-based line number of a byte offset, for diagnostics.
pub fn line_of(html: &str, offset: usize) -> usize {
    html.as_bytes()[..offset.min(html.len())]
        .iter()
        .filter(|&&b| b == b'\n')
        .count()
        + 1
}

#[cfg(test)]
pub(crate) fn locate_fallback(html: &str) -> Located<'_> {
    scan_fallback(html)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_selectors() {
        assert_eq!(
            "container:elemento-categorias".parse::<ContextSelector>().unwrap(),
            ContextSelector::Container("elemento-categorias".into())
        );
        assert_eq!(
            "img-class:personaje8".parse::<ContextSelector>().unwrap(),
            ContextSelector::ImgClass("personaje8".into())
        );
        assert_eq!(
            "document".parse::<ContextSelector>().unwrap(),
            ContextSelector::Document
        );
        assert!("container:".parse::<ContextSelector>().is_err());
        assert!("section:x".parse::<ContextSelector>().is_err());
        assert!("elemento".parse::<ContextSelector>().is_err());
    }

    #[test]
    fn selector_display_roundtrips() {
        for s in ["container:a-b", "img-class:c", "document"] {
            assert_eq!(s.parse::<ContextSelector>().unwrap().to_string(), s);
        }
    }

    #[test]
    fn ancestor_classes_are_collected() {
        let html = r#"<section class="wrap"><div class="elemento-categorias grid"><a href="/x"><img src="/uploads/a.webp"></a></div></section><img src="/uploads/b.webp">"#;
        let located = locate_images(html);
        assert!(!located.fallback);
        assert_eq!(located.sites.len(), 2);

        let first = &located.sites[0];
        assert_eq!(first.tag.value("src"), Some("/uploads/a.webp"));
        let classes = first.ancestor_classes.as_ref().unwrap();
        assert!(classes.contains(&"elemento-categorias".to_string()));
        assert!(classes.contains(&"wrap".to_string()));

        let second = &located.sites[1];
        assert!(second.ancestor_classes.as_ref().unwrap().is_empty());
    }

    #[test]
    fn container_match_is_token_exact() {
        let html = r#"<div class="elemento-categorias-b"><img src="/uploads/a.webp"></div>"#;
        let located = locate_images(html);
        let site = &located.sites[0];
        assert!(!ContextSelector::Container("elemento-categorias".into()).matches(site));
        assert!(ContextSelector::Container("elemento-categorias-b".into()).matches(site));
        assert!(ContextSelector::Document.matches(site));
    }

    #[test]
    fn img_class_match() {
        let html = r#"<div><img class="personaje8 lazy" src="/uploads/a.webp"></div>"#;
        let site = &locate_images(html).sites[0];
        assert!(ContextSelector::ImgClass("personaje8".into()).matches(site));
        assert!(!ContextSelector::ImgClass("personaje".into()).matches(site));
    }

    #[test]
    fn offsets_point_at_tags() {
        let html = "<p>\n  <IMG src=\"/uploads/a.webp\"/>\n</p>";
        let located = locate_images(html);
        let tag = &located.sites[0].tag;
        assert_eq!(&html[tag.span()], "<IMG src=\"/uploads/a.webp\"/>");
        assert_eq!(line_of(html, tag.offset), 2);
    }

    #[test]
    fn fallback_scan_has_no_ancestors() {
        let html = r#"<div class="elemento-categorias"><img class="c" src="/uploads/a.webp"></div>"#;
        let located = locate_fallback(html);
        assert_eq!(located.sites.len(), 1);
        let site = &located.sites[0];
        assert!(!ContextSelector::Container("elemento-categorias".into()).matches(site));
        assert!(ContextSelector::ImgClass("c".into()).matches(site));
    }

    fn ancestors(located: &Located<'_>, i: usize) -> Vec<String> {
        located.sites[i].ancestor_classes.clone().unwrap()
    }

    // =========================================================================
    // Implied end tags
    // =========================================================================

    #[test]
    fn unclosed_list_items_end_at_their_list() {
        let html = r#"<ul class="g"><li class="i"><img src="/uploads/a/1.webp"><li><img src="/uploads/a/2.webp"></ul><div class="o"><img src="/uploads/a/3.webp"></div>"#;
        let located = locate_images(html);
        assert!(!located.fallback);
        assert_eq!(ancestors(&located, 0), vec!["g", "i"]);
        assert_eq!(ancestors(&located, 1), vec!["g"]);
        assert_eq!(ancestors(&located, 2), vec!["o"]);
    }

    #[test]
    fn unclosed_paragraph_ends_with_its_parent() {
        let html = "<div class=\"personaje8\"><p>text<img src=\"/uploads/a/1.webp\"></div>\n<div class=\"other\"><img src=\"/uploads/a/2.webp\"></div>";
        let located = locate_images(html);
        assert_eq!(ancestors(&located, 0), vec!["personaje8"]);
        assert_eq!(ancestors(&located, 1), vec!["other"]);
    }

    #[test]
    fn block_start_tag_closes_paragraph() {
        let html = r#"<p class="intro">hi<div class="g"><img src="/uploads/a/1.webp"></div>"#;
        let located = locate_images(html);
        assert_eq!(ancestors(&located, 0), vec!["g"]);
    }

    #[test]
    fn table_cells_close_each_other() {
        let html = r#"<table><tr><td class="a"><img src="/uploads/a/1.webp"><td class="b"><img src="/uploads/a/2.webp"><tr><td><img src="/uploads/a/3.webp"></table>"#;
        let located = locate_images(html);
        assert_eq!(ancestors(&located, 0), vec!["a"]);
        assert_eq!(ancestors(&located, 1), vec!["b"]);
        assert!(ancestors(&located, 2).is_empty());
    }

    #[test]
    fn self_closing_components_do_not_enclose() {
        let html = r#"<Layout><Header class="g" /><img src="/uploads/a/1.webp"></Layout>"#;
        let located = locate_images(html);
        assert!(ancestors(&located, 0).is_empty());
    }

    #[test]
    fn script_comment_and_expression_class_are_ignored() {
        let html = concat!(
            "<script>const s = '<div class=\"g\">';</script>\n",
            "<!-- <img src=\"/uploads/a/0.webp\"> -->\n",
            "<div class={cls}><img src=\"/uploads/a/1.webp\"></div>",
        );
        let located = locate_images(html);
        assert_eq!(located.sites.len(), 1);
        assert!(ancestors(&located, 0).is_empty());
    }

    // =========================================================================
    // Frontmatter
    // =========================================================================

    #[test]
    fn frontmatter_with_angle_bracket_is_skipped() {
        let html = "---\nconst big = a < b;\nconst tag = '<img src=\"/uploads/z.webp\">';\n---\n<div class=\"personaje8\"><img src=\"/uploads/a/1.webp\"></div>";
        let located = locate_images(html);
        assert!(!located.fallback);
        assert_eq!(located.sites.len(), 1);
        assert_eq!(located.sites[0].tag.value("src"), Some("/uploads/a/1.webp"));
        assert_eq!(ancestors(&located, 0), vec!["personaje8"]);
        assert_eq!(line_of(html, located.sites[0].tag.offset), 5);
    }

    #[test]
    fn frontmatter_end_offsets() {
        assert_eq!(frontmatter_end("---\nx\n---\n<p>"), 10);
        assert_eq!(frontmatter_end("<p>---</p>"), 0);
        assert_eq!(frontmatter_end("---\nnever closed <p>"), 0);
    }

    // =========================================================================
    // Malformed tags and fallback
    // =========================================================================

    #[test]
    fn malformed_img_is_reported_and_scan_continues() {
        let html = "<div class=\"g\"><img src=\"/uploads/a/1.webp\"></div>\n<p><img src=\"/uploads/a/2.webp <b>x</b></p>\n<div class='h'><img src='/uploads/a/3.webp'></div>";
        let located = locate_images(html);
        assert!(!located.fallback);
        assert_eq!(located.sites.len(), 2);
        assert!(matches!(
            located.malformed.as_slice(),
            [MarkupError::MalformedTag { line: 2, .. }]
        ));
        assert_eq!(ancestors(&located, 1), vec!["h"]);
    }

    #[test]
    fn unterminated_start_tag_falls_back_to_scan() {
        let html = "<div class=\"g\"><img class=\"c\" src=\"/uploads/a/1.webp\"></div>\n<section data-x=\"oops>";
        let located = locate_images(html);
        assert!(located.fallback);
        assert_eq!(located.sites.len(), 1);
        assert!(located.sites[0].ancestor_classes.is_none());
        assert!(ContextSelector::ImgClass("c".into()).matches(&located.sites[0]));
    }

    #[test]
    fn selector_deserializes_from_string() {
        #[derive(Deserialize)]
        struct Rule {
            context: ContextSelector,
        }
        let rule: Rule = toml::from_str(r#"context = "container:personaje8""#).unwrap();
        assert_eq!(rule.context, ContextSelector::Container("personaje8".into()));
        assert!(toml::from_str::<Rule>(r#"context = "nope""#).is_err());
    }
}
