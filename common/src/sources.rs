use std::collections::BTreeMap;

use crate::schema::Source;

/// (id, name, country, locale, homepage)
const CATALOG: &[(&str, &str, &str, &str, &str)] = &[
    ("un-news", "UN News", "United Nations", "en", "https://news.un.org/en/"),
    ("cnn", "CNN", "United States", "en", "https://edition.cnn.com/"),
    ("ap", "AP", "United States", "en", "https://www.ap.org/"),
    ("rt", "RT", "Russia", "en", "https://www.rt.com/"),
    ("tass", "TASS", "Russia", "en", "https://tass.com/"),
    ("zeit", "Die Zeit", "Germany", "de", "https://www.zeit.de/index"),
    ("telegraph", "Telegraph", "United Kingdom", "en", "https://www.telegraph.co.uk/"),
    ("france24", "France 24", "France", "en", "https://www.france24.com/en/"),
    ("nhk", "NHK", "Japan", "ja", "https://www3.nhk.or.jp/news/"),
    ("yonhap", "Yonhap", "South Korea", "en", "https://en.yna.co.kr/"),
    ("ansa", "ANSA", "Italy", "en", "https://www.ansa.it/english"),
    ("ctv", "CTV News", "Canada", "en", "https://www.ctvnews.ca/"),
    ("folha", "Folha de S.Paulo", "Brazil", "pt", "https://www.folha.uol.com.br/"),
    ("times-of-israel", "Times of Israel", "Israel", "en", "https://www.timesofisrael.com/"),
    ("presstv", "Press TV", "Iran", "en", "https://www.presstv.ir/"),
    ("mothership", "Mothership.SG", "Singapore", "en", "https://mothership.sg"),
    ("kyiv-independent", "Kyiv Independent", "Ukraine", "en", "https://kyivindependent.com/"),
];

/// The built-in source catalog, in declaration order.
pub fn global_sources() -> Vec<Source> {
    CATALOG
        .iter()
        .map(|(id, name, country, locale, homepage)| Source {
            id: id.to_string(),
            name: name.to_string(),
            country: country.to_string(),
            locale: locale.to_string(),
            homepage: homepage.to_string(),
        })
        .collect()
}

pub fn find_source<'a>(catalog: &'a [Source], id: &str) -> Option<&'a Source> {
    catalog.iter().find(|s| s.id == id)
}

/// Format sources as a readable list grouped by country, for the planning prompt.
pub fn format_sources_for_planning(sources: &[Source]) -> String {
    let mut by_country: BTreeMap<&str, Vec<&Source>> = BTreeMap::new();
    for source in sources {
        by_country.entry(&source.country).or_default().push(source);
    }

    let mut out = String::from("Available news sources (grouped by country/organization):\n");
    for (country, country_sources) in by_country {
        out.push_str(&format!("\n{}:\n", country));
        for s in country_sources {
            out.push_str(&format!(
                "  - [{}] {} ({}): {}\n",
                s.id, s.name, s.locale, s.homepage
            ));
        }
    }
    out
}
