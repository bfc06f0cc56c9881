use serde::Serialize;

/// Loading/error/data triple exposed to screens by both adapters.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryState<T> {
    pub data: Option<T>,
    pub loading: bool,
    pub error: Option<String>,
}

impl<T> QueryState<T> {
    pub fn idle() -> Self {
        Self {
            data: None,
            loading: false,
            error: None,
        }
    }

    pub fn pending() -> Self {
        Self {
            data: None,
            loading: true,
            error: None,
        }
    }
}

impl<T> Default for QueryState<T> {
    fn default() -> Self {
        Self::idle()
    }
}
