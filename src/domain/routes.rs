use url::Url;

const BREAK_SEGMENT: &str = "break";
const STATS_SEGMENT: &str = "stats";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Home,
    Stats,
    Break(String),
    Unknown(String),
}

impl Route {
    pub fn path(&self) -> String {
        match self {
            Route::Home => "/".to_string(),
            Route::Stats => format!("/{STATS_SEGMENT}"),
            Route::Break(id) => break_path(id),
            Route::Unknown(path) => path.clone(),
        }
    }
}

/// Deep-link path carried in notification payloads.
pub fn break_path(break_id: &str) -> String {
    format!("/{BREAK_SEGMENT}/{break_id}")
}

/// Absolute URL of `path` under the application origin.
pub fn absolute_url(base: &Url, path: &str) -> Result<Url, url::ParseError> {
    base.join(path)
}

/// Accepts absolute URLs or bare paths (`/break/abc?from=notification`).
pub fn parse_route(raw: &str) -> Route {
    let parsed = Url::parse(raw).or_else(|_| {
        Url::parse("http://localhost/").and_then(|base| base.join(raw))
    });
    let Ok(url) = parsed else {
        return Route::Unknown(raw.to_string());
    };

    let segments = url
        .path_segments()
        .map(|segments| segments.filter(|segment| !segment.is_empty()).collect::<Vec<_>>())
        .unwrap_or_default();

    match segments.as_slice() {
        [] => Route::Home,
        [STATS_SEGMENT] => Route::Stats,
        [BREAK_SEGMENT, id] => Route::Break((*id).to_string()),
        _ => Route::Unknown(url.path().to_string()),
    }
}
