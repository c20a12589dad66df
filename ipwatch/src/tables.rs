// Only the tests build this off Windows.
#![cfg_attr(not(target_os = "windows"), allow(dead_code))]

use crate::RouteArgs;
use crate::error;
use iphelper::abi::{Adapter, MibIpForwardRow};
use iphelper::api::TableApi;
use iphelper::route;

pub fn print_routes<T: TableApi>(api: &T) -> error::Result<()> {
    let rows = route::forward_table(api)?;
    for row in &rows {
        println!("{row} if:{}", row.forward_if_index);
    }
    log::info!("{} routes", rows.len());
    Ok(())
}

pub fn print_addresses<T: TableApi>(api: &T, sorted: bool) -> error::Result<()> {
    let rows = route::address_table(api, sorted)?;
    for row in &rows {
        println!("{row}");
    }
    log::info!("{} addresses", rows.len());
    Ok(())
}

pub fn print_adapters<T: TableApi>(api: &T) -> error::Result<()> {
    let adapters = route::adapters(api)?;
    for adapter in &adapters {
        println!("{}", describe(adapter));
    }
    log::info!("{} adapters", adapters.len());
    Ok(())
}

fn describe(adapter: &Adapter) -> String {
    let join = |items: Vec<String>| {
        if items.is_empty() { "-".to_string() } else { items.join(",") }
    };

    let mut out = format!(
        "#{} {} [{}]",
        adapter.index, adapter.friendly_name, adapter.oper_status
    );
    if !adapter.hardware_addr.is_empty() {
        out.push_str(&format!(" mac:{}", adapter.mac()));
    }
    out.push_str(&format!(
        "\n    addr:{}\n    gw:{} dns:{}",
        join(adapter.unicast.iter().map(ToString::to_string).collect()),
        join(adapter.gateways.iter().map(ToString::to_string).collect()),
        join(adapter.dns_servers.iter().map(ToString::to_string).collect()),
    ));
    out
}

// netmgmt, the protocol of routes added by hand
const PROTO_NETMGMT: u32 = 3;
// indirect, the next hop is not the final destination
const TYPE_INDIRECT: u32 = 4;

impl RouteArgs {
    pub fn to_row(&self) -> MibIpForwardRow {
        let mut row = MibIpForwardRow {
            forward_if_index: self.if_index,
            forward_type: TYPE_INDIRECT,
            forward_proto: PROTO_NETMGMT,
            forward_metric1: self.metric,
            ..Default::default()
        };
        row.set_dest(self.dest);
        row.set_mask(self.mask);
        row.set_next_hop(self.gateway);
        row
    }
}

pub fn add_route<T: TableApi>(api: &T, args: &RouteArgs) -> error::Result<()> {
    let row = args.to_row();
    route::create_forward_entry(api, &row)?;
    log::info!("Added {row}");
    Ok(())
}

pub fn delete_route<T: TableApi>(api: &T, args: &RouteArgs) -> error::Result<()> {
    let row = args.to_row();
    route::delete_forward_entry(api, &row)?;
    log::info!("Deleted {row}");
    Ok(())
}
