//! An in-memory stand-in for `tc`, tracking the classes, filters and qdiscs of every device and
//! printing filter listings the way `tc filter show` does.

use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet},
    net::Ipv4Addr,
};

use weaknet_sim::{
    command::{self, Command, Executor, Output},
    tc::ClassId,
};

#[derive(Debug, Clone)]
pub struct Filter {
    pub handle: String,
    pub class_id: ClassId,
    pub address: Ipv4Addr,
    pub offset: u32,
}

#[derive(Debug, Default)]
pub struct Device {
    pub classes: BTreeSet<ClassId>,
    pub filters: Vec<Filter>,
    /// Netem qdiscs by parent class.
    pub qdiscs: BTreeMap<ClassId, String>,
    next_filter: u32,
}

#[derive(Debug, Default)]
pub struct FakeTc {
    pub devices: RefCell<BTreeMap<String, Device>>,
    pub log: RefCell<Vec<String>>,
    /// Commands starting with any of these argument prefixes fail.
    pub failing: Vec<Vec<&'static str>>,
}

fn value_after<'a>(args: &'a [String], key: &str) -> Option<&'a str> {
    args.iter().position(|a| a == key).and_then(|i| args.get(i + 1)).map(String::as_str)
}

fn fail(msg: &str) -> command::Result<Output> {
    Err(command::Error::NonZero(Output::failed(2, msg)))
}

impl FakeTc {
    pub fn failing(mut self, prefix: &[&'static str]) -> Self {
        self.failing.push(prefix.to_vec());
        self
    }

    pub fn with_device(self, name: &str) -> Self {
        self.devices.borrow_mut().insert(name.to_string(), Device::default());
        self
    }

    /// Routes `address` into `class_id` as if done by someone else.
    pub fn preload(self, name: &str, class_id: ClassId, address: Ipv4Addr) -> Self {
        {
            let mut devices = self.devices.borrow_mut();
            let device = devices.entry(name.to_string()).or_default();
            device.classes.insert(class_id);
            let handle = format!("800::{:x}", 0x800 + device.next_filter);
            device.next_filter += 1;
            device.filters.push(Filter { handle, class_id, address, offset: 16 });
        }
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.log.borrow().clone()
    }

    pub fn class_ids(&self, name: &str) -> BTreeSet<ClassId> {
        self.devices.borrow().get(name).map(|d| d.classes.clone()).unwrap_or_default()
    }

    pub fn filter_class_ids(&self, name: &str) -> Vec<ClassId> {
        self.devices
            .borrow()
            .get(name)
            .map(|d| d.filters.iter().map(|f| f.class_id).collect())
            .unwrap_or_default()
    }

    pub fn qdisc_count(&self, name: &str) -> usize {
        self.devices.borrow().get(name).map(|d| d.qdiscs.len()).unwrap_or_default()
    }

    fn listing(device: &Device) -> String {
        let mut out = String::new();
        if device.filters.is_empty() {
            return out;
        }

        out.push_str("filter parent 1: protocol ip pref 3 u32 chain 0 \n");
        out.push_str("filter parent 1: protocol ip pref 3 u32 chain 0 fh 800: ht divisor 1 \n");
        for (i, filter) in device.filters.iter().enumerate() {
            out.push_str(&format!(
                "filter parent 1: protocol ip pref 3 u32 chain 0 fh {} order {} key ht 800 bkt 0 *flowid {} not_in_hw \n",
                filter.handle,
                2048 + i,
                filter.class_id
            ));
            out.push_str(&format!(
                "  match {:08x}/ffffffff at {}\n",
                u32::from(filter.address),
                filter.offset
            ));
            out.push_str("  match 00110000/00ff0000 at 8\n");
        }
        out
    }

    fn handle(&self, cmd: &Command) -> command::Result<Output> {
        let args = &cmd.args;
        let Some(name) = value_after(args, "dev") else {
            return fail("missing dev");
        };

        let mut devices = self.devices.borrow_mut();
        let Some(device) = devices.get_mut(name) else {
            return fail(&format!("Cannot find device \"{name}\""));
        };

        let class_id = |key: &str| value_after(args, key).and_then(|v| v.parse::<ClassId>().ok());

        match (args[0].as_str(), args[1].as_str()) {
            ("filter", "show") => Ok(Output::ok(Self::listing(device))),
            ("class", "replace") => {
                let Some(id) = class_id("classid") else { return fail("bad classid") };
                device.classes.insert(id);
                Ok(Output::ok(""))
            }
            ("filter", "add") => {
                let Some(id) = class_id("flowid") else { return fail("bad flowid") };
                if !device.classes.contains(&id) {
                    return fail("class does not exist");
                }
                let offset = if args.iter().any(|a| a == "src") { 12 } else { 16 };
                let address = args
                    .iter()
                    .position(|a| a == "src" || a == "dst")
                    .and_then(|i| args[i + 1].parse().ok());
                let Some(address) = address else { return fail("bad address") };

                let handle = format!("800::{:x}", 0x800 + device.next_filter);
                device.next_filter += 1;
                device.filters.push(Filter { handle, class_id: id, address, offset });
                Ok(Output::ok(""))
            }
            ("qdisc", "add") => {
                let Some(parent) = class_id("parent") else { return fail("bad parent") };
                if !device.classes.contains(&parent) || device.qdiscs.contains_key(&parent) {
                    return fail("RTNETLINK answers: File exists");
                }
                let handle = value_after(args, "handle").unwrap_or_default().to_string();
                device.qdiscs.insert(parent, handle);
                Ok(Output::ok(""))
            }
            ("filter", "del") => {
                let handle = value_after(args, "handle").unwrap_or_default();
                let before = device.filters.len();
                device.filters.retain(|f| f.handle != handle);
                if device.filters.len() == before {
                    return fail("RTNETLINK answers: No such file or directory");
                }
                Ok(Output::ok(""))
            }
            ("class", "del") => {
                let Some(id) = class_id("classid") else { return fail("bad classid") };
                if !device.classes.remove(&id) {
                    return fail("RTNETLINK answers: No such file or directory");
                }
                device.qdiscs.remove(&id);
                Ok(Output::ok(""))
            }
            _ => fail("unsupported command"),
        }
    }
}

impl Executor for FakeTc {
    fn execute(&self, cmd: &Command) -> command::Result<Output> {
        self.log.borrow_mut().push(cmd.to_string());

        if self.failing.iter().any(|prefix| cmd.starts_with(prefix.as_slice())) {
            return fail("RTNETLINK answers: Operation not permitted");
        }

        self.handle(cmd)
    }
}
