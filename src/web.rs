//! Search provider that scrapes the YouTube results page.
//!
//! Page 1 comes from the `ytInitialData` JSON embedded in the HTML. Every later
//! page is a POST to the innertube search endpoint with the continuation token
//! handed out by the page before it, so tokens are cached per `(text, page)`.

use futures::future::BoxFuture;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use tracing::{debug, info};

use crate::constants::constants;
use crate::search::{Query, SearchError, SearchProvider, SearchResult, VideoSummary};
use crate::youtube::{ProviderKind, thumbnail_url};

const RESULTS_URL: &str = "https://www.youtube.com/results";
const CONTINUATION_URL: &str = "https://www.youtube.com/youtubei/v1/search?prettyPrint=false";

/// `MM:SS` or `HH:MM:SS` to seconds; anything else, overflow included, is 0.
pub fn parse_duration(text: &str) -> u64 {
  let parts: Option<Vec<u64>> = text.trim().split(':').map(|p| p.parse::<u64>().ok()).collect();
  let seconds = match parts.as_deref() {
    Some([m, s]) => m.checked_mul(60).and_then(|m| m.checked_add(*s)),
    Some([h, m, s]) => h
      .checked_mul(3600)
      .and_then(|h| m.checked_mul(60).and_then(|m| h.checked_add(m)))
      .and_then(|hm| hm.checked_add(*s)),
    _ => None,
  };
  seconds.unwrap_or(0)
}

/// Pull the `ytInitialData` object out of a results page.
fn extract_initial_data(html: &str) -> Result<Value, SearchError> {
  let marker = ["var ytInitialData = ", "window[\"ytInitialData\"] = ", "ytInitialData = "]
    .iter()
    .find_map(|m| html.find(m).map(|i| i + m.len()))
    .ok_or_else(|| SearchError::Parse("ytInitialData not found in results page".into()))?;
  // The object is followed by `;</script>`; a streaming parse stops at the end of the first value.
  serde_json::Deserializer::from_str(&html[marker..])
    .into_iter::<Value>()
    .next()
    .ok_or_else(|| SearchError::Parse("empty ytInitialData".into()))?
    .map_err(|e| SearchError::Parse(format!("ytInitialData: {}", e)))
}

fn text_of(v: &Value) -> Option<String> {
  v.get("simpleText")
    .and_then(Value::as_str)
    .map(str::to_string)
    .or_else(|| v.pointer("/runs/0/text").and_then(Value::as_str).map(str::to_string))
}

fn parse_video(renderer: &Value) -> Option<VideoSummary> {
  let id = renderer.get("videoId")?.as_str()?.to_string();
  let title = renderer.get("title").and_then(text_of)?;
  if id.is_empty() || title.is_empty() {
    return None;
  }
  let duration_seconds = renderer.get("lengthText").and_then(text_of).map_or(0, |t| parse_duration(&t));
  let author = renderer.get("ownerText").and_then(text_of);
  let thumbnail = renderer
    .pointer("/thumbnail/thumbnails/0/url")
    .and_then(Value::as_str)
    .map(str::to_string)
    .unwrap_or_else(|| thumbnail_url(&id));
  Some(VideoSummary { id, title, author, duration_seconds, thumbnail })
}

/// Walk a list of section renderers, collecting videos and the next-page token.
fn parse_sections(sections: &[Value]) -> SearchResult {
  let mut items = Vec::new();
  let mut continuation = None;
  let mut skipped = 0usize;
  for section in sections {
    if let Some(contents) = section.pointer("/itemSectionRenderer/contents").and_then(Value::as_array) {
      for entry in contents {
        if let Some(renderer) = entry.get("videoRenderer") {
          match parse_video(renderer) {
            Some(video) => items.push(video),
            None => skipped += 1,
          }
        }
      }
    }
    if let Some(token) =
      section.pointer("/continuationItemRenderer/continuationEndpoint/continuationCommand/token").and_then(Value::as_str)
    {
      continuation = Some(token.to_string());
    }
  }
  if skipped > 0 {
    debug!(skipped, "web: skipped video entries missing a title or id");
  }
  SearchResult { has_next_page: continuation.is_some(), items, continuation }
}

fn parse_initial_page(data: &Value) -> Result<SearchResult, SearchError> {
  let sections = data
    .pointer("/contents/twoColumnSearchResultsRenderer/primaryContents/sectionListRenderer/contents")
    .and_then(Value::as_array)
    .ok_or_else(|| SearchError::Parse("results page has no section list".into()))?;
  Ok(parse_sections(sections))
}

fn parse_continuation_page(data: &Value) -> Result<SearchResult, SearchError> {
  let commands = data
    .get("onResponseReceivedCommands")
    .and_then(Value::as_array)
    .ok_or_else(|| SearchError::Parse("continuation response has no commands".into()))?;
  let sections: Vec<Value> = commands
    .iter()
    .filter_map(|c| c.pointer("/appendContinuationItemsAction/continuationItems").and_then(Value::as_array))
    .flatten()
    .cloned()
    .collect();
  Ok(parse_sections(&sections))
}

fn check_status(status: StatusCode) -> Result<(), SearchError> {
  if status == StatusCode::TOO_MANY_REQUESTS {
    return Err(SearchError::RateLimited);
  }
  if !status.is_success() {
    return Err(SearchError::Network(format!("YouTube returned HTTP {}", status)));
  }
  Ok(())
}

pub struct WebProvider {
  client: Client,
  /// Token that fetches page `n + 1`, keyed by `(text, n)`.
  tokens: StdMutex<HashMap<(String, u32), String>>,
}

impl WebProvider {
  pub fn new() -> Self {
    let client = Client::builder().user_agent(constants().user_agent.as_str()).build().unwrap_or_default();
    Self { client, tokens: StdMutex::new(HashMap::new()) }
  }

  fn cached_token(&self, text: &str, page: u32) -> Option<String> {
    self.tokens.lock().unwrap_or_else(|e| e.into_inner()).get(&(text.to_string(), page)).cloned()
  }

  /// Drop tokens for every other text. A fresh search makes them unreachable.
  fn retain_only(&self, text: &str) {
    let mut tokens = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
    let before = tokens.len();
    tokens.retain(|(t, _), _| t == text);
    if tokens.len() < before {
      debug!(dropped = before - tokens.len(), "web: pruned continuation tokens");
    }
  }

  fn remember(&self, query: &Query, result: &SearchResult) {
    if let Some(ref token) = result.continuation {
      self.tokens.lock().unwrap_or_else(|e| e.into_inner()).insert((query.text.clone(), query.page), token.clone());
    }
  }

  async fn first_page(&self, text: &str) -> Result<SearchResult, SearchError> {
    let url = reqwest::Url::parse_with_params(RESULTS_URL, &[("search_query", text)])
      .map_err(|e| SearchError::Network(format!("bad search url: {}", e)))?;
    let response = self.client.get(url).send().await.map_err(|e| SearchError::Network(e.to_string()))?;
    check_status(response.status())?;
    let html = response.text().await.map_err(|e| SearchError::Network(e.to_string()))?;
    parse_initial_page(&extract_initial_data(&html)?)
  }

  async fn continued_page(&self, token: &str) -> Result<SearchResult, SearchError> {
    let body = json!({
      "context": { "client": { "clientName": "WEB", "clientVersion": constants().web_client_version, "hl": "en" } },
      "continuation": token,
    });
    let response =
      self.client.post(CONTINUATION_URL).json(&body).send().await.map_err(|e| SearchError::Network(e.to_string()))?;
    check_status(response.status())?;
    let data: Value = response.json().await.map_err(|e| SearchError::Parse(e.to_string()))?;
    parse_continuation_page(&data)
  }

  async fn fetch_page(&self, query: &Query) -> Result<SearchResult, SearchError> {
    if query.page == 1 {
      self.retain_only(&query.text);
    }
    // Walk forward from the nearest page whose token we already hold.
    let mut page = query.page;
    while page > 1 && self.cached_token(&query.text, page - 1).is_none() {
      page -= 1;
    }
    loop {
      let step = Query::new(query.text.clone(), page);
      let result = if page == 1 {
        self.first_page(&step.text).await?
      } else {
        match self.cached_token(&step.text, page - 1) {
          Some(token) => self.continued_page(&token).await?,
          None => return Ok(SearchResult { items: Vec::new(), has_next_page: false, continuation: None }),
        }
      };
      self.remember(&step, &result);
      if page == query.page {
        return Ok(result);
      }
      if !result.has_next_page {
        info!(text = %query.text, reached = page, wanted = query.page, "web: ran out of pages while seeking");
        return Ok(SearchResult { items: Vec::new(), has_next_page: false, continuation: None });
      }
      page += 1;
    }
  }
}

impl Default for WebProvider {
  fn default() -> Self {
    Self::new()
  }
}

impl SearchProvider for WebProvider {
  fn name(&self) -> &'static str {
    ProviderKind::Web.label()
  }

  fn fetch<'a>(&'a self, query: &'a Query) -> BoxFuture<'a, Result<SearchResult, SearchError>> {
    Box::pin(self.fetch_page(query))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn video(id: &str, title: &str, length: Option<&str>) -> Value {
    let mut v = json!({
      "videoId": id,
      "title": { "runs": [{ "text": title }] },
      "ownerText": { "runs": [{ "text": "Channel" }] },
      "thumbnail": { "thumbnails": [{ "url": format!("https://i.ytimg.com/vi/{}/default.jpg", id) }] },
    });
    if let Some(len) = length {
      v["lengthText"] = json!({ "simpleText": len });
    }
    json!({ "videoRenderer": v })
  }

  fn continuation(token: &str) -> Value {
    json!({ "continuationItemRenderer": { "continuationEndpoint": { "continuationCommand": { "token": token } } } })
  }

  #[test]
  fn duration_formats() {
    assert_eq!(parse_duration("3:45"), 225);
    assert_eq!(parse_duration("1:02:03"), 3723);
    assert_eq!(parse_duration("LIVE"), 0);
    assert_eq!(parse_duration(""), 0);
    assert_eq!(parse_duration("1:2:3:4"), 0);
  }

  #[test]
  fn oversized_durations_are_unknown() {
    assert_eq!(parse_duration("999999999999999999:00"), 0);
    assert_eq!(parse_duration("18446744073709551615:59"), 0);
    assert_eq!(parse_duration("5124095576030432:00:00"), 0);
    assert_eq!(parse_duration("0:18446744073709551615"), u64::MAX);
  }

  #[test]
  fn extracts_initial_data_from_html() {
    let html = r#"<html><script>var ytInitialData = {"a":{"b":"};</script>"}};</script><script>x()</script></html>"#;
    let data = extract_initial_data(html).unwrap();
    assert_eq!(data["a"]["b"], "};</script>");
  }

  #[test]
  fn missing_initial_data_is_parse_error() {
    assert!(matches!(extract_initial_data("<html></html>"), Err(SearchError::Parse(_))));
    assert!(matches!(extract_initial_data("var ytInitialData = {broken"), Err(SearchError::Parse(_))));
  }

  #[test]
  fn parses_initial_page() {
    let data = json!({
      "contents": { "twoColumnSearchResultsRenderer": { "primaryContents": { "sectionListRenderer": { "contents": [
        { "itemSectionRenderer": { "contents": [
          video("aaa", "First", Some("3:45")),
          { "shelfRenderer": {} },
          video("bbb", "Second", None),
          { "videoRenderer": { "videoId": "ccc" } },
        ] } },
        continuation("TOKEN1"),
      ] } } } }
    });
    let page = parse_initial_page(&data).unwrap();
    let ids: Vec<_> = page.items.iter().map(|v| v.id.as_str()).collect();
    assert_eq!(ids, vec!["aaa", "bbb"]);
    assert_eq!(page.items[0].duration_seconds, 225);
    assert_eq!(page.items[0].author.as_deref(), Some("Channel"));
    assert_eq!(page.items[1].duration_seconds, 0);
    assert!(page.has_next_page);
    assert_eq!(page.continuation.as_deref(), Some("TOKEN1"));
  }

  #[test]
  fn initial_page_without_sections_is_parse_error() {
    assert!(matches!(parse_initial_page(&json!({ "contents": {} })), Err(SearchError::Parse(_))));
  }

  #[test]
  fn parses_continuation_page() {
    let data = json!({
      "onResponseReceivedCommands": [{ "appendContinuationItemsAction": { "continuationItems": [
        { "itemSectionRenderer": { "contents": [ video("ddd", "Third", Some("1:00:00")) ] } },
      ] } }]
    });
    let page = parse_continuation_page(&data).unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].duration_seconds, 3600);
    assert!(!page.has_next_page);
    assert!(page.continuation.is_none());
  }

  #[test]
  fn status_mapping() {
    assert_eq!(check_status(StatusCode::TOO_MANY_REQUESTS), Err(SearchError::RateLimited));
    assert!(matches!(check_status(StatusCode::SERVICE_UNAVAILABLE), Err(SearchError::Network(_))));
    assert!(check_status(StatusCode::OK).is_ok());
  }

  #[test]
  fn tokens_are_cached_per_text_and_page() {
    let provider = WebProvider::new();
    let result = SearchResult { items: Vec::new(), has_next_page: true, continuation: Some("T2".into()) };
    provider.remember(&Query::new("lofi", 1), &result);
    assert_eq!(provider.cached_token("lofi", 1).as_deref(), Some("T2"));
    assert!(provider.cached_token("lofi", 2).is_none());
    assert!(provider.cached_token("jazz", 1).is_none());
  }

  #[test]
  fn new_search_prunes_tokens_for_other_texts() {
    let provider = WebProvider::new();
    let result = SearchResult { items: Vec::new(), has_next_page: true, continuation: Some("T".into()) };
    provider.remember(&Query::new("lofi", 1), &result);
    provider.remember(&Query::new("lofi", 2), &result);
    provider.remember(&Query::new("jazz", 1), &result);

    provider.retain_only("jazz");
    assert!(provider.cached_token("lofi", 1).is_none());
    assert!(provider.cached_token("lofi", 2).is_none());
    assert_eq!(provider.cached_token("jazz", 1).as_deref(), Some("T"));
  }
}
