//! Account ids pasted by users as links from the billing portal.

use meterbot_core::AccountId;
use url::Url;

const PARAM: &str = "openId";

/// Pull the `openId` out of a portal link.
///
/// Looks at the query string first, then at a fragment shaped like a query
/// string (single-page apps put it there), and finally scans the raw text.
pub fn extract_account_id(link: &str) -> Option<AccountId> {
    let link = link.trim();

    let from_url = Url::parse(link).ok().and_then(|url| {
        find_param(url.query_pairs()).or_else(|| {
            url.fragment().and_then(|fragment| {
                // "#/page?openId=..." carries its own query after the route.
                let query = fragment.split_once('?').map_or(fragment, |(_, q)| q);
                find_param(url::form_urlencoded::parse(query.as_bytes()))
            })
        })
    });

    from_url
        .or_else(|| scan(link))
        .map(AccountId::new)
        .filter(|id| !id.is_empty())
}

fn find_param<'a>(
    mut pairs: impl Iterator<Item = (std::borrow::Cow<'a, str>, std::borrow::Cow<'a, str>)>,
) -> Option<String> {
    pairs
        .find(|(key, value)| key == PARAM && !value.trim().is_empty())
        .map(|(_, value)| value.into_owned())
}

fn scan(link: &str) -> Option<String> {
    let start = link.find("openId=")? + PARAM.len() + 1;
    let rest = &link[start..];
    let end = rest
        .find(|c| matches!(c, '&' | '/' | '#' | '?'))
        .unwrap_or(rest.len());
    let value = &rest[..end];
    (!value.is_empty()).then(|| value.to_string())
}
