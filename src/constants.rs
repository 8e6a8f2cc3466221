//! Constants module for the stream scraper
//!
//! Contains endpoint URL builders and fixed markers of the scraped sites.

/// URL builder functions for all endpoints
pub mod endpoints {
    /// TMDb API root
    pub const TMDB_API: &str = "https://api.themoviedb.org/3";

    /// Site search, returns `[{"id": ..}, ..]`
    ///
    /// `query` is already `+`-joined; each word is percent-encoded.
    pub fn search(base_url: &str, query: &str) -> String {
        let encoded = query
            .split('+')
            .map(|word| urlencoding::encode(word).into_owned())
            .collect::<Vec<_>>()
            .join("+");
        format!("{}/wp-json/wp/v2/search?search={}&_fields=id", base_url, encoded)
    }

    /// Post title and rendered content
    pub fn post(base_url: &str, post_id: u64) -> String {
        format!("{}/wp-json/wp/v2/posts/{}?_fields=title,content", base_url, post_id)
    }

    /// TMDb lookup of an IMDb id
    pub fn tmdb_find(imdb_id: &str, api_key: &str) -> String {
        format!(
            "{}/find/{}?api_key={}&language=it&external_source=imdb_id",
            TMDB_API,
            urlencoding::encode(imdb_id),
            urlencoding::encode(api_key)
        )
    }

    /// TMDb series details
    pub fn tmdb_tv(tmdb_id: &str, api_key: &str) -> String {
        format!(
            "{}/tv/{}?api_key={}&language=it",
            TMDB_API,
            urlencoding::encode(tmdb_id),
            urlencoding::encode(api_key)
        )
    }

    /// IMDb title page, scraped when TMDb is unavailable
    pub fn imdb_title(imdb_id: &str) -> String {
        format!("https://www.imdb.com/title/{}/", urlencoding::encode(imdb_id))
    }
}

/// Fixed markers of the content site
pub mod markers {
    /// Body returned by the post endpoint for a dead id
    pub const INVALID_POST: &str = "ID articolo non valido";
    /// Text of the link to the full post
    pub const READ_MORE: &str = "Continua a leggere";
    /// Separator between an episode label and its links
    pub const ROW_SEPARATOR: &str = " – ";
}

/// Form fields and headers used by the gate and providers
pub mod forms {
    /// CAPTCHA answer field of the gate
    pub const CAPTCHA_FIELD: &str = "captch4";
    /// Empty flag the provider expects on its form
    pub const HUMAN_FIELD: &str = "imhuman";
    /// File name input of the provider form
    pub const FILE_NAME_FIELD: &str = "fname";
    /// Range header value used to resolve redirects without a body
    pub const FIRST_BYTE_RANGE: &str = "bytes=0-0";
}
