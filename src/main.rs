fn main() -> anyhow::Result<()> {
    riverside_lib::run()
}
