use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use std::sync::Arc;

use crate::nekos::collector::UrlSink;
use crate::nekos::error::NekosResult;
use crate::nekos::sender::UrlProber;
use crate::nekos::url_file::UrlFile;
use crate::nekos::urls::ImageUrl;

/// Extensions tried for every missing image, after the ones its family already uses.
pub(crate) const EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "gif", "webp"];

/// Default upper bound of HEAD requests per run.
pub(crate) const DEFAULT_PROBE_LIMIT: usize = 500;

/// URLs that only differ in the number inside their filename.
#[derive(Debug, Default)]
struct Family {
    /// Zero padding width, `0` when the numbers are not padded.
    width: usize,
    indices: BTreeSet<u64>,
    extensions: Vec<String>,
}

/// `https://host/dir/cat_` and `_hd` of `https://host/dir/cat_012_hd.png`.
type FamilyKey = (String, String);

/// Splits a URL around the last run of digits in its filename stem.
fn parse(url: &ImageUrl) -> Option<(FamilyKey, &str, &str)> {
    let full = url.as_str();
    let name = url.filename();
    let name_start = full.rfind(name)?;
    let (stem, extension) = name.rsplit_once('.')?;

    let end = stem.rfind(|c: char| c.is_ascii_digit())? + 1;
    let start = stem[..end]
        .rfind(|c: char| !c.is_ascii_digit())
        .map(|i| i + 1)
        .unwrap_or(0);

    let head = format!("{}{}", &full[..name_start], &stem[..start]);
    let tail = stem[end..].to_string();
    Some(((head, tail), &stem[start..end], extension))
}

fn families(urls: &[ImageUrl]) -> BTreeMap<FamilyKey, Family> {
    let mut families: BTreeMap<FamilyKey, Family> = BTreeMap::new();
    for url in urls {
        let Some((key, digits, extension)) = parse(url) else {
            continue;
        };
        let Ok(index) = digits.parse::<u64>() else {
            continue;
        };

        let family = families.entry(key).or_default();
        if digits.starts_with('0') && digits.len() > 1 {
            family.width = family.width.max(digits.len());
        }
        family.indices.insert(index);
        if !family.extensions.iter().any(|known| known == extension) {
            family.extensions.push(extension.to_string());
        }
    }
    families
}

/// A gap inside a family, not yet probed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MissingImage {
    /// URL without the extension.
    pub(crate) stem: String,
    /// Extensions in probing order, shared by the whole family.
    pub(crate) extensions: Rc<[String]>,
}

impl MissingImage {
    fn candidates(&self) -> impl Iterator<Item = String> + '_ {
        self.extensions.iter().map(move |extension| format!("{}.{}", self.stem, extension))
    }
}

fn family_gaps((head, tail): FamilyKey, family: Family) -> impl Iterator<Item = MissingImage> {
    let Family {
        width,
        indices,
        mut extensions,
    } = family;
    for extension in EXTENSIONS {
        if !extensions.iter().any(|known| known == extension) {
            extensions.push(extension.to_string());
        }
    }
    let extensions: Rc<[String]> = extensions.into();

    let range = match (indices.first(), indices.last()) {
        (Some(&first), Some(&last)) => first..=last,
        _ => 1..=0,
    };
    range
        .filter(move |index| !indices.contains(index))
        .map(move |index| MissingImage {
            stem: format!("{head}{index:0width$}{tail}"),
            extensions: Rc::clone(&extensions),
        })
}

/// Every index between the smallest and largest known index of each family that no URL has.
///
/// Gaps are produced on demand, a family spanning millions of indices costs nothing until iterated.
pub(crate) fn missing_images(urls: &[ImageUrl]) -> impl Iterator<Item = MissingImage> + use<> {
    families(urls)
        .into_iter()
        .flat_map(|(key, family)| family_gaps(key, family))
}

/// Best effort search for images the listing endpoint never returned.
pub(crate) struct Autocompleter {
    prober: Arc<dyn UrlProber>,
    probe_limit: usize,
}

impl Autocompleter {
    pub(crate) fn new(prober: Arc<dyn UrlProber>) -> Self {
        Self {
            prober,
            probe_limit: DEFAULT_PROBE_LIMIT,
        }
    }

    pub(crate) fn with_probe_limit(mut self, probe_limit: usize) -> Self {
        self.probe_limit = probe_limit;
        self
    }

    /// Probes the gaps of `urls` and hands every hit to `sink`.
    ///
    /// # Arguments
    ///
    /// * `urls`: Collected URLs the gaps are derived from.
    /// * `sink`: Optional receiver of found URLs.
    /// * `url_file`: Found URLs are added to it, after every hit when `update_file_every_url`
    ///   is set and once at the end otherwise.
    pub(crate) fn complete(
        &self,
        urls: &[ImageUrl],
        sink: Option<&dyn UrlSink>,
        url_file: Option<&UrlFile>,
        update_file_every_url: bool,
    ) -> NekosResult<Vec<ImageUrl>> {
        info!("Autocompleting gaps between {} urls...", urls.len());

        let mut found = Vec::new();
        let mut probes = 0;
        let mut gaps = 0;
        'gaps: for gap in missing_images(urls) {
            gaps += 1;
            for candidate in gap.candidates() {
                if probes >= self.probe_limit {
                    warn!("Stopped autocompleting after {} probes", probes);
                    break 'gaps;
                }
                probes += 1;
                if !self.prober.exists(&candidate) {
                    continue;
                }

                debug!("Autocompleted {}", candidate);
                let url = ImageUrl::new(candidate);
                if let Some(sink) = sink {
                    sink.submit(std::slice::from_ref(&url));
                }
                if update_file_every_url {
                    if let Some(url_file) = url_file {
                        url_file.add([url.as_str().to_string()])?;
                    }
                }
                found.push(url);
                continue 'gaps;
            }
        }

        if !update_file_every_url {
            if let Some(url_file) = url_file {
                url_file.add(found.iter().map(|url| url.as_str().to_string()))?;
            }
        }

        info!("Autocompleted {} of {} missing images with {} probes", found.len(), gaps, probes);
        Ok(found)
    }
}
