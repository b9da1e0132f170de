/// Canonical driver operations.
///
/// Incoming command names resolve to these through [`resolve`]; several
/// wire names are deprecated aliases kept for compatibility and map onto
/// the same operation as their canonical name.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Cmd {
    NewSession,
    GetSessionCapabilities,
    DeleteSession,
    SetContext,
    GetContext,
    SetScriptTimeout,
    SetSearchTimeout,
    Timeouts,
    Log,
    GetLogs,
    SetTestName,
    ExecuteScript,
    ExecuteAsyncScript,
    ExecuteJsScript,
    ImportScript,
    ClearImportedScripts,
    Get,
    GetCurrentUrl,
    GoBack,
    GoForward,
    Refresh,
    GetTitle,
    GetWindowType,
    GetPageSource,
    GetAppCacheStatus,
    GetWindowHandle,
    GetWindowHandles,
    GetChromeWindowHandle,
    GetChromeWindowHandles,
    SwitchToWindow,
    SwitchToFrame,
    GetActiveFrame,
    GetWindowSize,
    SetWindowSize,
    GetWindowPosition,
    SetWindowPosition,
    MaximizeWindow,
    Close,
    CloseChromeWindow,
    FindElement,
    FindElements,
    FindChildElement,
    FindChildElements,
    GetActiveElement,
    ClickElement,
    GetElementAttribute,
    GetElementText,
    GetElementTagName,
    IsElementDisplayed,
    GetElementValueOfCssProperty,
    SubmitElement,
    GetElementRect,
    GetElementLocation,
    IsElementEnabled,
    IsElementSelected,
    SendKeysToElement,
    ClearElement,
    SingleTap,
    ActionChain,
    MultiAction,
    AddCookie,
    GetCookies,
    DeleteCookie,
    DeleteAllCookies,
    DismissDialog,
    AcceptDialog,
    GetTextFromDialog,
    SendKeysToDialog,
    TakeScreenshot,
}

/// Resolve a wire command name, including deprecated aliases, to its
/// canonical operation.
pub fn resolve(name: &str) -> Option<Cmd> {
    let cmd = match name {
        "newSession" => Cmd::NewSession,
        "getSessionCapabilities" => Cmd::GetSessionCapabilities,
        "deleteSession" => Cmd::DeleteSession,
        "setContext" => Cmd::SetContext,
        "getContext" => Cmd::GetContext,
        "setScriptTimeout" => Cmd::SetScriptTimeout,
        "setSearchTimeout" => Cmd::SetSearchTimeout,
        "timeouts" => Cmd::Timeouts,
        "log" => Cmd::Log,
        "getLogs" => Cmd::GetLogs,
        "setTestName" => Cmd::SetTestName,
        "executeScript" => Cmd::ExecuteScript,
        "executeAsyncScript" => Cmd::ExecuteAsyncScript,
        "executeJSScript" => Cmd::ExecuteJsScript,
        "importScript" => Cmd::ImportScript,
        "clearImportedScripts" => Cmd::ClearImportedScripts,
        "get" | "goUrl" => Cmd::Get,
        "getCurrentUrl" | "getUrl" => Cmd::GetCurrentUrl,
        "goBack" => Cmd::GoBack,
        "goForward" => Cmd::GoForward,
        "refresh" => Cmd::Refresh,
        "getTitle" => Cmd::GetTitle,
        "getWindowType" => Cmd::GetWindowType,
        "getPageSource" => Cmd::GetPageSource,
        "getAppCacheStatus" => Cmd::GetAppCacheStatus,
        "getWindowHandle" | "getCurrentWindowHandle" | "getWindow" => Cmd::GetWindowHandle,
        "getWindowHandles" | "getCurrentWindowHandles" | "getWindows" => Cmd::GetWindowHandles,
        "getChromeWindowHandle" | "getCurrentChromeWindowHandle" => Cmd::GetChromeWindowHandle,
        "getChromeWindowHandles" => Cmd::GetChromeWindowHandles,
        "switchToWindow" => Cmd::SwitchToWindow,
        "switchToFrame" => Cmd::SwitchToFrame,
        "getActiveFrame" => Cmd::GetActiveFrame,
        "getWindowSize" => Cmd::GetWindowSize,
        "setWindowSize" => Cmd::SetWindowSize,
        "getWindowPosition" => Cmd::GetWindowPosition,
        "setWindowPosition" => Cmd::SetWindowPosition,
        "maximizeWindow" => Cmd::MaximizeWindow,
        "close" | "closeWindow" => Cmd::Close,
        "closeChromeWindow" => Cmd::CloseChromeWindow,
        "findElement" => Cmd::FindElement,
        "findElements" => Cmd::FindElements,
        "findChildElement" => Cmd::FindChildElement,
        "findChildElements" => Cmd::FindChildElements,
        "getActiveElement" => Cmd::GetActiveElement,
        "clickElement" => Cmd::ClickElement,
        "getElementAttribute" => Cmd::GetElementAttribute,
        "getElementText" => Cmd::GetElementText,
        "getElementTagName" => Cmd::GetElementTagName,
        "isElementDisplayed" => Cmd::IsElementDisplayed,
        "getElementValueOfCssProperty" => Cmd::GetElementValueOfCssProperty,
        "submitElement" => Cmd::SubmitElement,
        "getElementRect" | "getElementSize" => Cmd::GetElementRect,
        "getElementLocation" | "getElementPosition" => Cmd::GetElementLocation,
        "isElementEnabled" => Cmd::IsElementEnabled,
        "isElementSelected" => Cmd::IsElementSelected,
        "sendKeysToElement" => Cmd::SendKeysToElement,
        "clearElement" => Cmd::ClearElement,
        "singleTap" => Cmd::SingleTap,
        "actionChain" => Cmd::ActionChain,
        "multiAction" => Cmd::MultiAction,
        "addCookie" => Cmd::AddCookie,
        "getCookies" | "getAllCookies" => Cmd::GetCookies,
        "deleteCookie" => Cmd::DeleteCookie,
        "deleteAllCookies" => Cmd::DeleteAllCookies,
        "dismissDialog" => Cmd::DismissDialog,
        "acceptDialog" => Cmd::AcceptDialog,
        "getTextFromDialog" => Cmd::GetTextFromDialog,
        "sendKeysToDialog" => Cmd::SendKeysToDialog,
        "takeScreenshot" | "screenShot" | "screenshot" => Cmd::TakeScreenshot,
        _ => return None,
    };
    Some(cmd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deprecated_aliases_resolve_to_the_canonical_handler() {
        for (alias, canonical) in [
            ("goUrl", "get"),
            ("getUrl", "getCurrentUrl"),
            ("getCurrentWindowHandle", "getWindowHandle"),
            ("getWindow", "getWindowHandle"),
            ("getWindows", "getWindowHandles"),
            ("getCurrentWindowHandles", "getWindowHandles"),
            ("getCurrentChromeWindowHandle", "getChromeWindowHandle"),
            ("closeWindow", "close"),
            ("screenShot", "takeScreenshot"),
            ("screenshot", "takeScreenshot"),
            ("getAllCookies", "getCookies"),
            ("getElementSize", "getElementRect"),
            ("getElementPosition", "getElementLocation"),
        ] {
            assert_eq!(resolve(alias), resolve(canonical), "{alias}");
            assert!(resolve(alias).is_some(), "{alias}");
        }
    }

    #[test]
    fn unknown_names_do_not_resolve() {
        assert_eq!(resolve("warpTenEngage"), None);
    }
}
