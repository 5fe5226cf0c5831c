extern crate url;

use self::url::Url;
use core::fmt;
use std::ops::Add;

const SEP: char = '/';

/// Server URL being built segment by segment.
#[derive(Clone)]
pub struct Resource {
    url: Url,
}

impl Resource {
    #[must_use]
    pub fn new(uri: &str) -> Option<Resource> {
        let base = Url::parse(uri).ok()?;
        Some(Resource { url: base })
    }

    /// `<base>/api/upload`
    #[must_use]
    pub fn upload(uri: &str) -> Option<Resource> {
        let mut r = Resource::new(uri)?;
        r.append_path("api/upload");
        Some(r)
    }

    /// `<base>/api/group/<id>`
    #[must_use]
    pub fn group(uri: &str, group_id: &str) -> Option<Resource> {
        let mut r = Resource::new(uri)?;
        r.append_path("api/group").append_segment(group_id);
        Some(r)
    }

    /// `<base>/api/group/<id>/download`
    #[must_use]
    pub fn group_download(uri: &str, group_id: &str) -> Option<Resource> {
        let mut r = Resource::group(uri, group_id)?;
        r.append_path("download");
        Some(r)
    }

    pub fn append_path(&mut self, path: &str) -> &mut Self {
        if let Some(segments) = self.url.path_segments() {
            let p = segments
                .chain(path.split(SEP))
                .filter(|x| !x.is_empty())
                .fold(String::new(), |s, x| {
                    let mut y = s.add(x);
                    y.push(SEP);
                    y
                });

            let path_to_set = if path.chars().next_back().unwrap_or_default() == SEP {
                &p
            } else {
                &p[..p.len() - 1]
            };
            self.url.set_path(path_to_set);
        } else {
            let r = self.url.join(path);
            if let Ok(u) = r {
                self.url = u;
            }
        }
        self
    }

    /// Appends one segment escaping everything that is not allowed inside it.
    pub fn append_segment(&mut self, segment: &str) -> &mut Self {
        let escaped = url_escape::encode_component(segment);
        self.append_path(&escaped)
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}
