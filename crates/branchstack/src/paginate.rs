//! Continuation-token pagination
//!
//! Every "list X" remote call in this crate speaks in [`Page`]s, and callers
//! that want the whole result set go through [`collect_pages`], an explicit
//! token-following loop. Callers that act between pages (the bucket sweeper
//! deletes what each page lists before fetching the next) drive the same
//! `Page` API by hand.

use std::future::Future;

use anyhow::Result;

/// One page of a listed result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Token for the next page; `None` means the listing is exhausted.
    pub next_token: Option<String>,
}

impl<T> Page<T> {
    /// A page with nothing after it.
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_token: None,
        }
    }

    /// A page with more to follow.
    pub fn partial(items: Vec<T>, next_token: impl Into<String>) -> Self {
        Self {
            items,
            next_token: Some(next_token.into()),
        }
    }
}

/// Fetch every page and concatenate the items.
///
/// `fetch` receives the continuation token from the previous page (`None` on
/// the first call) and may itself end the loop early by returning a page
/// without a token.
pub async fn collect_pages<T, F, Fut>(mut fetch: F) -> Result<Vec<T>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    let mut items = Vec::new();
    let mut token: Option<String> = None;

    loop {
        let mut page = fetch(token.take()).await?;
        items.append(&mut page.items);
        match page.next_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test]
    async fn single_page() {
        let items = collect_pages(|_| async { Ok(Page::last(vec![1, 2, 3])) })
            .await
            .unwrap();
        assert_eq!(items, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn follows_tokens_in_order() {
        let seen = Mutex::new(Vec::new());
        let items = collect_pages(|token| {
            let seen = &seen;
            async move {
                seen.lock().unwrap().push(token.clone());
                Ok(match token.as_deref() {
                    None => Page::partial(vec!["a"], "t1"),
                    Some("t1") => Page::partial(vec!["b", "c"], "t2"),
                    Some("t2") => Page::last(vec!["d"]),
                    other => panic!("unexpected token {other:?}"),
                })
            }
        })
        .await
        .unwrap();

        assert_eq!(items, vec!["a", "b", "c", "d"]);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![None, Some("t1".to_string()), Some("t2".to_string())]
        );
    }

    #[tokio::test]
    async fn empty_first_page_with_token_continues() {
        let items = collect_pages(|token| async move {
            Ok(match token.as_deref() {
                None => Page::partial(Vec::new(), "more"),
                Some(_) => Page::last(vec![42]),
            })
        })
        .await
        .unwrap();
        assert_eq!(items, vec![42]);
    }

    #[tokio::test]
    async fn fetch_errors_propagate() {
        let result: Result<Vec<u8>> = collect_pages(|token| async move {
            match token {
                None => Ok(Page::partial(vec![1], "t1")),
                Some(_) => anyhow::bail!("listing failed"),
            }
        })
        .await;
        assert!(result.unwrap_err().to_string().contains("listing failed"));
    }
}
