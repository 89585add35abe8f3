pub const ACCEPT_JSON: &str = "application/json";
pub const ACCEPT_OCTET_STREAM: &str = "application/octet-stream";
pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Response representation selected through the `Accept` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Representation {
    /// One JSON document.
    #[default]
    Json,
    /// The same JSON text split into fixed-size chunks.
    Stream,
}

impl Representation {
    pub fn media_type(&self) -> &'static str {
        match self {
            Representation::Json => ACCEPT_JSON,
            Representation::Stream => ACCEPT_OCTET_STREAM,
        }
    }

    /// Resolve an `Accept` header value.
    ///
    /// Media ranges are weighed by their `q` parameter; the highest-weighted supported type
    /// wins and JSON wins ties. A missing header, wildcards and unsupported types resolve to
    /// JSON.
    pub fn from_accept(header: Option<&str>) -> Self {
        let Some(header) = header else {
            return Representation::Json;
        };

        let mut json_q = None::<f32>;
        let mut stream_q = None::<f32>;
        for range in header.split(',') {
            let mut parts = range.split(';');
            let media = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
            let q = parts
                .filter_map(|param| param.split_once('='))
                .filter(|(name, _)| name.trim().eq_ignore_ascii_case("q"))
                .find_map(|(_, value)| value.trim().parse::<f32>().ok())
                .unwrap_or(1.0);
            let slot = match media.as_str() {
                ACCEPT_JSON => &mut json_q,
                ACCEPT_OCTET_STREAM => &mut stream_q,
                _ => continue,
            };
            *slot = Some(slot.map_or(q, |current| current.max(q)));
        }

        match (json_q, stream_q) {
            (_, Some(stream)) if stream > 0.0 && json_q.is_none_or(|json| stream > json) => {
                Representation::Stream
            }
            _ => Representation::Json,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_media_types_select_representation() {
        assert_eq!(
            Representation::from_accept(Some("application/json")),
            Representation::Json
        );
        assert_eq!(
            Representation::from_accept(Some("application/octet-stream")),
            Representation::Stream
        );
    }

    #[test]
    fn missing_or_unsupported_accept_falls_back_to_json() {
        assert_eq!(Representation::from_accept(None), Representation::Json);
        assert_eq!(Representation::from_accept(Some("*/*")), Representation::Json);
        assert_eq!(
            Representation::from_accept(Some("text/event-stream")),
            Representation::Json
        );
    }

    #[test]
    fn quality_values_are_respected() {
        assert_eq!(
            Representation::from_accept(Some(
                "application/json;q=0.5, application/octet-stream;q=0.9"
            )),
            Representation::Stream
        );
        assert_eq!(
            Representation::from_accept(Some("application/json, application/octet-stream")),
            Representation::Json
        );
        assert_eq!(
            Representation::from_accept(Some("application/octet-stream;q=0")),
            Representation::Json
        );
    }

    #[test]
    fn quality_parameter_name_is_case_insensitive() {
        assert_eq!(
            Representation::from_accept(Some(
                "application/octet-stream;Q=0.9, application/json;Q=0.5"
            )),
            Representation::Stream
        );
        assert_eq!(
            Representation::from_accept(Some("application/octet-stream; Q = 0")),
            Representation::Json
        );
    }

    #[test]
    fn media_type_matches_header_value() {
        assert_eq!(Representation::Json.media_type(), "application/json");
        assert_eq!(Representation::Stream.media_type(), "application/octet-stream");
    }
}
