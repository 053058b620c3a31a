fn main() -> anyhow::Result<()> {
    macropad_bridge_lib::run()
}
