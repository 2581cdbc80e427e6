fn main() {
    println!("cargo:rerun-if-changed=assets/icons/GmailNotifier.ico");

    // Windows 平台:嵌入应用图标
    #[cfg(windows)]
    {
        let mut res = winres::WindowsResource::new();
        res.set_icon("assets/icons/GmailNotifier.ico");
        if let Err(e) = res.compile() {
            println!("cargo:warning=嵌入应用图标失败: {}", e);
        }
    }
}
