fn main() -> anyhow::Result<()> {
    kpi_dashboard_lib::run()
}
