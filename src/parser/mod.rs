//! Parser module for extracting structured data from HTML
//!
//! Everything the pipeline reads out of static markup lives here: the year
//! listed in a post, episode rows and their section headings, provider
//! anchors, provider forms, gate pages and media URLs. No JavaScript is
//! executed; inline scripts are only pattern-matched.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};

use crate::constants::markers;
use crate::models::{EpisodeFragment, HostLink, HostType, LanguageHint, SearchMode};
use crate::text;

static READ_MORE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r#"<a\s+href="([^"]+)"[^>]*>{}</a>"#,
        regex::escape(markers::READ_MORE)
    ))
    .expect("valid read-more regex")
});

static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?is)<h[1-6][^>]*>(.*?)</h[1-6]>|<div[^>]*class="[^"]*su-spoiler-title[^"]*"[^>]*>(.*?)</div>"#,
    )
    .expect("valid heading regex")
});

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid tag regex"));

static COOKIE_ASSIGN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"document\.cookie\s*=\s*["']\s*([^=;"'\s]+)\s*=\s*([^;"']*)"#)
        .expect("valid cookie assignment regex")
});

static JS_REDIRECT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?:window\.|document\.)?location(?:\.href)?\s*=\s*["']([^"']+)["']|location\.(?:replace|assign)\(\s*["']([^"']+)["']\s*\)"#,
    )
    .expect("valid redirect regex")
});

/// Media URL grammars of the form-post provider, tried in order
static MEDIA_URL_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"sources:\s*\[\s*"([^"]+)""#,
        r#"file:\s*"([^"]+)""#,
        r#"src:\s*"([^"]+)""#,
        r#"<source[^>]*\ssrc=["']([^"']+)["']"#,
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid media url regex"))
    .collect()
});

static PAGE_TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<title>([^<]+)</title>").expect("valid title regex"));

static TITLE_YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\((\d{4})\)").expect("valid title year regex"));

static TRAILING_PAREN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\([^)]*\)\s*$").expect("valid trailing paren regex"));

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

/// First `19xx`/`20xx` in the text that is not glued to a `/`
///
/// Dates such as `12/2019/` or URL segments are skipped.
pub fn extract_year(text: &str) -> Option<u16> {
    let bytes = text.as_bytes();
    if bytes.len() < 4 {
        return None;
    }
    for i in 0..=bytes.len() - 4 {
        let window = &bytes[i..i + 4];
        let century_ok = matches!(&window[..2], b"19" | b"20");
        if !century_ok || !window[2].is_ascii_digit() || !window[3].is_ascii_digit() {
            continue;
        }
        if i > 0 && bytes[i - 1] == b'/' {
            continue;
        }
        if bytes.get(i + 4) == Some(&b'/') {
            continue;
        }
        // window is ASCII digits
        let year = std::str::from_utf8(window).ok()?.parse::<u16>().ok()?;
        return Some(year);
    }
    None
}

/// Target of the "read more" link of a post excerpt
pub fn read_more_link(body: &str) -> Option<String> {
    READ_MORE_RE
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Episode label grammars for one season/episode, most specific first
///
/// Each pattern captures the rest of the line up to the next `<br>`.
pub fn episode_patterns(season: u32, episode: u32, mode: SearchMode) -> Vec<Regex> {
    let tail = r"\s*(?P<row>.*?)<br\s*/?>";
    let sources = match mode {
        SearchMode::Legacy => vec![format!("{season}&#215;(?P<ep>{episode:02}){tail}")],
        SearchMode::Advanced => vec![
            format!("{season}&#215;(?P<ep>{episode:02}){tail}"),
            format!("{season}&#215;(?P<ep>{episode}){tail}"),
            format!("{season}[xX×](?P<ep>{episode:02}){tail}"),
            format!("{season}[xX×](?P<ep>{episode}){tail}"),
            format!(r"{season}\s*[xX×]\s*(?P<ep>0?{episode}){tail}"),
            format!("S{season:02}E(?P<ep>{episode:02}){tail}"),
            format!("S{season}E(?P<ep>0?{episode}){tail}"),
        ],
    };
    sources.iter().filter_map(|p| Regex::new(p).ok()).collect()
}

/// An episode row found in a post body
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeRow {
    /// Markup after the episode label, up to the line break
    pub html: String,
    /// Byte offset of the label in the body
    pub offset: usize,
}

/// Rows of the first pattern that matches anything
///
/// Labels glued to further digits (`11×01` when looking for season 1, or
/// `1×10` when looking for episode 1) are not matches.
pub fn find_episode_rows(body: &str, patterns: &[Regex]) -> Vec<EpisodeRow> {
    let digit_before = |idx: usize| {
        body[..idx]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_ascii_digit())
    };
    let digit_at = |idx: usize| body[idx..].chars().next().is_some_and(|c| c.is_ascii_digit());

    for pattern in patterns {
        let rows: Vec<EpisodeRow> = pattern
            .captures_iter(body)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let number = caps.name("ep")?;
                if digit_before(whole.start()) || digit_at(number.end()) {
                    return None;
                }
                Some(EpisodeRow {
                    html: caps
                        .name("row")
                        .map(|m| m.as_str().to_string())
                        .unwrap_or_default(),
                    offset: whole.start(),
                })
            })
            .collect();
        if !rows.is_empty() {
            return rows;
        }
    }
    Vec::new()
}

/// Language hint from the closest heading above `offset`
pub fn section_language_hint(body: &str, offset: usize) -> LanguageHint {
    let Some(prefix) = body.get(..offset) else {
        return LanguageHint::Unknown;
    };
    let heading = HEADING_RE
        .captures_iter(prefix)
        .last()
        .and_then(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| m.as_str().to_string());

    match heading {
        Some(heading) => {
            let plain = TAG_RE.replace_all(&heading, " ");
            if has_sub_token(&plain) {
                LanguageHint::Sub
            } else {
                LanguageHint::Ita
            }
        }
        None => LanguageHint::Unknown,
    }
}

/// Whether text carries a standalone `sub` word
pub fn has_sub_token(text: &str) -> bool {
    text::normalize(text).split(' ').any(|word| word == "sub")
}

/// Cut every fragment describing one episode out of a post body
///
/// Rows without any link are dropped, and when a row carries a
/// ` – `-separated label only the part after it is kept.
pub fn locate_episode(
    post_id: u64,
    body: &str,
    season: u32,
    episode: u32,
    mode: SearchMode,
) -> Vec<EpisodeFragment> {
    let patterns = episode_patterns(season, episode, mode);
    find_episode_rows(body, &patterns)
        .into_iter()
        .filter(|row| row.html.contains("href"))
        .map(|row| {
            let html = match row.html.split_once(markers::ROW_SEPARATOR) {
                Some((_, links)) => links.to_string(),
                None => row.html,
            };
            EpisodeFragment {
                post_id,
                raw_html: html,
                language_hint: section_language_hint(body, row.offset),
            }
        })
        .collect()
}

/// Provider anchors of an episode fragment, recognized by their text
pub fn extract_host_links(fragment: &str) -> Vec<HostLink> {
    let Some(anchor) = selector("a[href]") else {
        return Vec::new();
    };
    let document = Html::parse_fragment(fragment);
    document
        .select(&anchor)
        .filter_map(|a| {
            let label = a.text().collect::<String>().trim().to_string();
            let host_type = HostType::from_label(&label)?;
            let url = a.value().attr("href")?.trim().to_string();
            if url.is_empty() {
                return None;
            }
            Some(HostLink {
                url,
                display_name: label,
                host_type,
            })
        })
        .collect()
}

/// Every named `<input>` of a page as form fields, in document order
pub fn parse_form_inputs(html: &str) -> Vec<(String, String)> {
    let Some(input) = selector("input") else {
        return Vec::new();
    };
    let document = Html::parse_document(html);
    let mut fields: Vec<(String, String)> = Vec::new();
    for element in document.select(&input) {
        let Some(name) = element.value().attr("name") else {
            continue;
        };
        let value = element.value().attr("value").unwrap_or_default().to_string();
        match fields.iter_mut().find(|(n, _)| n == name) {
            Some(existing) => existing.1 = value,
            None => fields.push((name.to_string(), value)),
        }
    }
    fields
}

/// `href` of the first anchor of a page (the gate's proceed link)
pub fn first_anchor_href(html: &str) -> Option<String> {
    let anchor = selector("a")?;
    let document = Html::parse_document(html);
    let first = document.select(&anchor).next()?;
    first
        .value()
        .attr("href")
        .map(str::trim)
        .filter(|href| !href.is_empty())
        .map(str::to_string)
}

/// Base64 payload of the first `data:` image on a page
pub fn captcha_image_data(html: &str) -> Option<String> {
    let img = selector("img[src]")?;
    let document = Html::parse_document(html);
    document.select(&img).find_map(|element| {
        let src = element.value().attr("src")?;
        if !src.starts_with("data:") {
            return None;
        }
        src.split_once(',')
            .map(|(_, data)| data.trim().to_string())
            .filter(|data| !data.is_empty())
    })
}

/// Cookie the gate's inline script asks the browser to set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieChallenge {
    pub name: String,
    pub value: String,
    /// Page the script navigates to after setting the cookie
    pub redirect: Option<String>,
}

/// Detect a `document.cookie = "NAME=VALUE"` challenge script
pub fn cookie_challenge(html: &str) -> Option<CookieChallenge> {
    let caps = COOKIE_ASSIGN_RE.captures(html)?;
    let name = caps.get(1)?.as_str().to_string();
    let value = caps.get(2).map(|m| m.as_str().trim().to_string()).unwrap_or_default();
    let redirect = JS_REDIRECT_RE
        .captures(html)
        .and_then(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| m.as_str().to_string());
    Some(CookieChallenge {
        name,
        value,
        redirect,
    })
}

/// Direct media URL in a provider response
pub fn media_url(html: &str) -> Option<String> {
    MEDIA_URL_RES.iter().find_map(|re| {
        re.captures(html)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    })
}

/// Title and year from a reference page `<title>` such as
/// `Show Name (TV Series 2020–2023) - IMDb` or `Show Name (2020) - IMDb`
pub fn reference_page_title(html: &str) -> Option<(String, u16)> {
    let raw = PAGE_TITLE_RE.captures(html)?.get(1)?.as_str();
    let decoded = text::decode_entities(raw);
    let title = match decoded.find(" - IMDb") {
        Some(idx) => &decoded[..idx],
        None => decoded.as_str(),
    };
    let year = TITLE_YEAR_RE
        .captures(title)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u16>().ok())
        .or_else(|| {
            title
                .rfind('(')
                .and_then(|idx| extract_year(&title[idx..]))
        })
        .unwrap_or(0);
    let title = TRAILING_PAREN_RE.replace(title, "").trim().to_string();
    if title.is_empty() {
        return None;
    }
    Some((title, year))
}

#[cfg(test)]
mod tests {
    use super::*;

    const POST_BODY: &str = concat!(
        "<p>Anno: 2020</p>",
        "<div class=\"su-spoiler-title\">Stagione 1</div>",
        "1&#215;01 Pilot – <a href=\"https://clicka.test/d1\">DeltaBit</a> - ",
        "<a href=\"https://clicka.test/m1\">MixDrop</a><br />",
        "1&#215;02 Secondo – <a href=\"https://clicka.test/d2\">DeltaBit</a><br />",
        "<div class=\"su-spoiler-title\">Stagione 1 Sub Ita</div>",
        "1&#215;01 Pilot – <a href=\"https://clicka.test/d3\">DeltaBit</a><br />",
    );

    #[test]
    fn test_extract_year() {
        assert_eq!(extract_year("Anno 2013, stagione 2"), Some(2013));
        assert_eq!(extract_year("uploads/2019/ then 2021"), Some(2021));
        assert_eq!(extract_year("12/2019/"), None);
        assert_eq!(extract_year("no year 1850"), None);
        assert_eq!(extract_year("20"), None);
    }

    #[test]
    fn test_read_more_link() {
        let body = r#"<p>x</p><a href="https://site.test/show/" class="more">Continua a leggere</a>"#;
        assert_eq!(read_more_link(body), Some("https://site.test/show/".to_string()));
        assert_eq!(read_more_link("<p>nothing</p>"), None);
        let marked = format!(r#"<a href="/s/">{}</a>"#, markers::READ_MORE);
        assert_eq!(read_more_link(&marked), Some("/s/".to_string()));
        assert_eq!(read_more_link(r#"<a href="/s/">Continua</a>"#), None);
    }

    #[test]
    fn test_entity_pattern_matches() {
        let body = "1&#215;01 Pilot <a href=\"x\">DeltaBit</a><br>";
        let rows = find_episode_rows(body, &episode_patterns(1, 1, SearchMode::Advanced));
        assert_eq!(rows.len(), 1);
        assert!(rows[0].html.starts_with("Pilot"));
    }

    #[test]
    fn test_sxe_pattern_matches_alone() {
        let body = "S01E01 Pilot <a href=\"x\">MixDrop</a><br/>";
        let rows = find_episode_rows(body, &episode_patterns(1, 1, SearchMode::Advanced));
        assert_eq!(rows.len(), 1);
        assert!(rows[0].html.contains("MixDrop"));
    }

    #[test]
    fn test_plain_x_and_spaced_patterns() {
        let patterns = episode_patterns(2, 5, SearchMode::Advanced);
        assert_eq!(find_episode_rows("2x05 a<br>", &patterns).len(), 1);
        assert_eq!(find_episode_rows("2×5 a<br>", &patterns).len(), 1);
        assert_eq!(find_episode_rows("2 x 05 a<br>", &patterns).len(), 1);
        assert_eq!(find_episode_rows("S2E5 a<br>", &patterns).len(), 1);
        assert!(find_episode_rows("2x06 a<br>", &patterns).is_empty());
    }

    #[test]
    fn test_first_matching_pattern_wins() {
        let body = "1&#215;01 entity<br>1x01 plain<br>";
        let rows = find_episode_rows(body, &episode_patterns(1, 1, SearchMode::Advanced));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].html, "entity");
    }

    #[test]
    fn test_season_prefix_glued_to_digit_is_skipped() {
        let body = "11&#215;01 wrong season<br>";
        let rows = find_episode_rows(body, &episode_patterns(1, 1, SearchMode::Advanced));
        assert!(rows.is_empty());
    }

    #[test]
    fn test_unpadded_episode_not_prefix_of_longer_number() {
        let body = "1&#215;10 decimo <a href=\"x\">DeltaBit</a><br>";
        let rows = find_episode_rows(body, &episode_patterns(1, 1, SearchMode::Advanced));
        assert!(rows.is_empty());
    }

    #[test]
    fn test_legacy_single_pattern() {
        let patterns = episode_patterns(1, 1, SearchMode::Legacy);
        assert_eq!(patterns.len(), 1);
        assert!(find_episode_rows("S01E01 a<br>", &patterns).is_empty());
        assert_eq!(find_episode_rows("1&#215;01 a<br>", &patterns).len(), 1);
    }

    #[test]
    fn test_section_language_hint() {
        let sub_offset = POST_BODY.rfind("1&#215;01").unwrap();
        assert_eq!(section_language_hint(POST_BODY, sub_offset), LanguageHint::Sub);
        let ita_offset = POST_BODY.find("1&#215;01").unwrap();
        assert_eq!(section_language_hint(POST_BODY, ita_offset), LanguageHint::Ita);
        assert_eq!(section_language_hint("1x01 a<br>", 0), LanguageHint::Unknown);
    }

    #[test]
    fn test_heading_tags() {
        let body = "<h3>Episodi <strong>SUB ITA</strong></h3>1x01 <a href=\"x\">MixDrop</a><br>";
        let offset = body.find("1x01").unwrap();
        assert_eq!(section_language_hint(body, offset), LanguageHint::Sub);
    }

    #[test]
    fn test_has_sub_token() {
        assert!(has_sub_token("Sub Ita"));
        assert!(has_sub_token("ita-sub"));
        assert!(!has_sub_token("Subito"));
        assert!(!has_sub_token("Stagione 1"));
    }

    #[test]
    fn test_locate_episode() {
        let fragments = locate_episode(7, POST_BODY, 1, 1, SearchMode::Advanced);
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].post_id, 7);
        assert!(fragments[0].raw_html.starts_with("<a href"));
        assert_eq!(fragments[0].language_hint, LanguageHint::Ita);
        assert_eq!(fragments[1].language_hint, LanguageHint::Sub);
    }

    #[test]
    fn test_locate_episode_skips_rows_without_links() {
        let body = "1x01 Prossimamente<br>";
        assert!(locate_episode(1, body, 1, 1, SearchMode::Advanced).is_empty());
    }

    #[test]
    fn test_extract_host_links() {
        let fragment = r#"<a href="https://clicka.test/d1">DeltaBit</a> - <a href="https://clicka.test/m1">MixDrop</a> - <a href="https://clicka.test/x">Other</a>"#;
        let links = extract_host_links(fragment);
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].host_type, HostType::Deltabit);
        assert_eq!(links[0].url, "https://clicka.test/d1");
        assert_eq!(links[1].host_type, HostType::Mixdrop);
        assert_eq!(links[1].display_name, "MixDrop");
    }

    #[test]
    fn test_parse_form_inputs() {
        let html = r#"<form><input type="hidden" name="op" value="download1"><input name="id" value="abc"><input name="fname" value="Show.S01E01.mp4"><input type="submit"><input name="empty"></form>"#;
        let fields = parse_form_inputs(html);
        assert_eq!(
            fields,
            vec![
                ("op".to_string(), "download1".to_string()),
                ("id".to_string(), "abc".to_string()),
                ("fname".to_string(), "Show.S01E01.mp4".to_string()),
                ("empty".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn test_first_anchor_href() {
        assert_eq!(
            first_anchor_href(r#"<p>ok</p><a href="https://deltabit.test/e/1">Proceed</a>"#),
            Some("https://deltabit.test/e/1".to_string())
        );
        assert_eq!(first_anchor_href("<form><img src=\"data:image/png;base64,AA\"></form>"), None);
    }

    #[test]
    fn test_captcha_image_data() {
        let html = r#"<img src="/logo.png"><img src="data:image/png;base64,iVBORw0K">"#;
        assert_eq!(captcha_image_data(html), Some("iVBORw0K".to_string()));
        assert_eq!(captcha_image_data("<img src=\"/a.png\">"), None);
    }

    #[test]
    fn test_cookie_challenge() {
        let html = r#"<script>document.cookie="SecurityGT=abc123 ; path=/"; window.location.href="/go/xyz";</script>"#;
        let challenge = cookie_challenge(html).unwrap();
        assert_eq!(challenge.name, "SecurityGT");
        assert_eq!(challenge.value, "abc123");
        assert_eq!(challenge.redirect, Some("/go/xyz".to_string()));

        let html = r#"<script>document.cookie = 'k=v'; location.replace('https://a.test/');</script>"#;
        let challenge = cookie_challenge(html).unwrap();
        assert_eq!(challenge.redirect, Some("https://a.test/".to_string()));

        assert!(cookie_challenge("<p>plain page</p>").is_none());
    }

    #[test]
    fn test_media_url_patterns() {
        assert_eq!(
            media_url(r#"player.setup({sources: ["https://cdn.test/v.mp4"]})"#),
            Some("https://cdn.test/v.mp4".to_string())
        );
        assert_eq!(
            media_url(r#"{file: "https://cdn.test/f.mp4"}"#),
            Some("https://cdn.test/f.mp4".to_string())
        );
        assert_eq!(
            media_url(r#"{src: "https://cdn.test/s.m3u8"}"#),
            Some("https://cdn.test/s.m3u8".to_string())
        );
        assert_eq!(
            media_url(r#"<video><source type="video/mp4" src="https://cdn.test/t.mp4"></video>"#),
            Some("https://cdn.test/t.mp4".to_string())
        );
        assert_eq!(media_url("<p>File not found</p>"), None);
    }

    #[test]
    fn test_reference_page_title() {
        let html = "<html><head><title>Show Name (TV Series 2020&ndash;2023) - IMDb</title></head></html>";
        assert_eq!(reference_page_title(html), Some(("Show Name".to_string(), 2020)));

        let html = "<title>Mercoledì (2022) - IMDb</title>";
        assert_eq!(reference_page_title(html), Some(("Mercoledì".to_string(), 2022)));

        let html = "<title>Untitled - IMDb</title>";
        assert_eq!(reference_page_title(html), Some(("Untitled".to_string(), 0)));

        assert_eq!(reference_page_title("<p>no title</p>"), None);
    }
}
