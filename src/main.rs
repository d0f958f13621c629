fn main() -> anyhow::Result<()> {
    scriptconv::run()
}
