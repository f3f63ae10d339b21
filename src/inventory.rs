use crate::models::{DeviceStatus, Equipment, Ticket, TicketPriority, TicketStatus};
use serde::Serialize;

/// Summary figures shown on the dashboard.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_equipment: usize,
    pub open_tickets: usize,
    pub by_status: Vec<(DeviceStatus, usize)>,
    pub devices_per_city: Vec<(String, usize)>,
}

const STATUS_ORDER: [DeviceStatus; 4] = [
    DeviceStatus::Operational,
    DeviceStatus::MaintenanceRequired,
    DeviceStatus::OutOfOrder,
    DeviceStatus::UnderRepair,
];

// In-memory equipment and ticket store
#[derive(Debug, Default)]
pub struct InventoryStore {
    equipment: Vec<Equipment>,
    tickets: Vec<Ticket>,
}

impl InventoryStore {
    pub fn new(equipment: Vec<Equipment>, tickets: Vec<Ticket>) -> Self {
        Self { equipment, tickets }
    }

    /// Store pre-populated with the demo hospital fleet.
    pub fn seeded() -> Self {
        let store = Self::new(seed_equipment(), seed_tickets());
        log::info!(
            "Inventory seeded with {} devices and {} tickets",
            store.equipment.len(),
            store.tickets.len()
        );
        store
    }

    pub fn list_equipment(&self) -> &[Equipment] {
        &self.equipment
    }

    pub fn list_tickets(&self) -> &[Ticket] {
        &self.tickets
    }

    pub fn find_equipment(&self, id: &str) -> Option<&Equipment> {
        self.equipment.iter().find(|e| e.id == id)
    }

    /// Case-insensitive substring match on name, serial number and location.
    pub fn search_equipment(&self, query: &str) -> Vec<&Equipment> {
        let needle = query.trim().to_lowercase();
        self.equipment
            .iter()
            .filter(|e| {
                needle.is_empty()
                    || e.name.to_lowercase().contains(&needle)
                    || e.serial_number.to_lowercase().contains(&needle)
                    || e.location.to_lowercase().contains(&needle)
            })
            .collect()
    }

    // Newest tickets are listed first
    pub fn add_ticket(&mut self, ticket: Ticket) {
        log::info!("Adding ticket {} for equipment {}", ticket.id, ticket.equipment_id);
        self.tickets.insert(0, ticket);
    }

    pub fn set_ticket_analysis(&mut self, ticket_id: &str, analysis: String) -> bool {
        match self.tickets.iter_mut().find(|t| t.id == ticket_id) {
            Some(ticket) => {
                ticket.ai_analysis = Some(analysis);
                true
            }
            None => false,
        }
    }

    pub fn next_ticket_id(&self) -> String {
        let highest = self
            .tickets
            .iter()
            .filter_map(|t| t.id.strip_prefix("TCK-"))
            .filter_map(|n| n.parse::<u32>().ok())
            .max()
            .unwrap_or(500);
        format!("TCK-{}", highest + 1)
    }

    pub fn dashboard_stats(&self) -> DashboardStats {
        let by_status = STATUS_ORDER
            .iter()
            .map(|status| (*status, self.equipment.iter().filter(|e| e.status == *status).count()))
            .collect();

        let mut devices_per_city: Vec<(String, usize)> = Vec::new();
        for equipment in &self.equipment {
            let city = equipment.location.split(" - ").next().unwrap_or("").trim().to_string();
            match devices_per_city.iter_mut().find(|(name, _)| *name == city) {
                Some((_, count)) => *count += 1,
                None => devices_per_city.push((city, 1)),
            }
        }

        DashboardStats {
            total_equipment: self.equipment.len(),
            open_tickets: self.tickets.iter().filter(|t| t.status == TicketStatus::Open).count(),
            by_status,
            devices_per_city,
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn equipment(
    id: &str,
    name: &str,
    kind: &str,
    serial_number: &str,
    location: &str,
    department: &str,
    status: DeviceStatus,
    maintenance: (&str, &str),
) -> Equipment {
    Equipment {
        id: id.to_string(),
        name: name.to_string(),
        kind: kind.to_string(),
        serial_number: serial_number.to_string(),
        location: location.to_string(),
        department: department.to_string(),
        status,
        last_maintenance: maintenance.0.to_string(),
        next_maintenance: maintenance.1.to_string(),
    }
}

fn seed_equipment() -> Vec<Equipment> {
    vec![
        equipment(
            "EQ-1001",
            "MRI Scanner 3.0T",
            "Imaging",
            "SN-MRI-9982",
            "الرياض - مستشفى الملك فيصل التخصصي",
            "الأشعة",
            DeviceStatus::Operational,
            ("2024-01-15", "2024-07-15"),
        ),
        equipment(
            "EQ-1002",
            "Ventilator X5",
            "Life Support",
            "SN-VNT-2231",
            "جدة - مستشفى الملك فهد",
            "العناية المركزة",
            DeviceStatus::MaintenanceRequired,
            ("2023-11-20", "2024-05-20"),
        ),
        equipment(
            "EQ-1003",
            "CT Scanner Revolution",
            "Imaging",
            "SN-CT-4451",
            "الدمام - مجمع الدمام الطبي",
            "الطوارئ",
            DeviceStatus::UnderRepair,
            ("2024-02-10", "2024-08-10"),
        ),
        equipment(
            "EQ-1004",
            "Ultrasound System",
            "Imaging",
            "SN-US-1122",
            "الرياض - مدينة الملك سعود الطبية",
            "النساء والولادة",
            DeviceStatus::Operational,
            ("2024-03-01", "2024-09-01"),
        ),
        equipment(
            "EQ-1005",
            "Anesthesia Machine",
            "Surgical",
            "SN-AN-7788",
            "مكة المكرمة - مستشفى النور",
            "العمليات",
            DeviceStatus::OutOfOrder,
            ("2023-12-05", "2024-06-05"),
        ),
    ]
}

fn seed_tickets() -> Vec<Ticket> {
    vec![
        Ticket {
            id: "TCK-501".to_string(),
            equipment_id: "EQ-1002".to_string(),
            title: "انخفاض ضغط الأكسجين".to_string(),
            description: "الجهاز يعطي تنبيه انخفاض ضغط متكرر أثناء التشغيل.".to_string(),
            reported_by: "د. أحمد السالم".to_string(),
            date_created: "2024-05-18".to_string(),
            priority: TicketPriority::High,
            status: TicketStatus::Open,
            ai_analysis: Some(
                "بناءً على الوصف، قد يكون هناك تسريب في صمامات الدخل أو انسداد في الفلاتر الداخلية. يوصى بفحص وحدة المزج."
                    .to_string(),
            ),
        },
        Ticket {
            id: "TCK-502".to_string(),
            equipment_id: "EQ-1003".to_string(),
            title: "خطأ في معايرة الصورة".to_string(),
            description: "ظهور تشويش في الصور المقطعية.".to_string(),
            reported_by: "أخصائي فهد العنزي".to_string(),
            date_created: "2024-05-19".to_string(),
            priority: TicketPriority::Medium,
            status: TicketStatus::InProgress,
            ai_analysis: None,
        },
        Ticket {
            id: "TCK-503".to_string(),
            equipment_id: "EQ-1005".to_string(),
            title: "الجهاز لا يعمل".to_string(),
            description: "فشل كامل في التشغيل، لا توجد طاقة.".to_string(),
            reported_by: "د. سارة الشهري".to_string(),
            date_created: "2024-05-20".to_string(),
            priority: TicketPriority::Critical,
            status: TicketStatus::Open,
            ai_analysis: None,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_matches_name_serial_and_location() {
        let store = InventoryStore::seeded();
        assert_eq!(store.search_equipment("ventilator")[0].id, "EQ-1002");
        assert_eq!(store.search_equipment("sn-ct")[0].id, "EQ-1003");
        assert_eq!(store.search_equipment("الرياض").len(), 2);
        assert_eq!(store.search_equipment("").len(), 5);
        assert!(store.search_equipment("dialysis").is_empty());
    }

    #[test]
    fn next_ticket_id_follows_highest() {
        let store = InventoryStore::seeded();
        assert_eq!(store.next_ticket_id(), "TCK-504");
        assert_eq!(InventoryStore::default().next_ticket_id(), "TCK-501");
    }

    #[test]
    fn added_ticket_is_listed_first_and_counted() {
        let mut store = InventoryStore::seeded();
        let before = store.dashboard_stats().open_tickets;
        let mut ticket = store.list_tickets()[2].clone();
        ticket.id = store.next_ticket_id();
        store.add_ticket(ticket);
        assert_eq!(store.list_tickets()[0].id, "TCK-504");
        assert_eq!(store.dashboard_stats().open_tickets, before + 1);
        assert!(store.set_ticket_analysis("TCK-504", "check fuse".to_string()));
        assert!(!store.set_ticket_analysis("TCK-999", "n/a".to_string()));
    }

    #[test]
    fn dashboard_counts_status_and_cities() {
        let stats = InventoryStore::seeded().dashboard_stats();
        assert_eq!(stats.total_equipment, 5);
        assert_eq!(stats.open_tickets, 2);
        assert_eq!(stats.by_status[0], (DeviceStatus::Operational, 2));
        assert_eq!(stats.by_status[3], (DeviceStatus::UnderRepair, 1));
        assert_eq!(stats.devices_per_city[0], ("الرياض".to_string(), 2));
        assert_eq!(stats.devices_per_city.len(), 4);
    }
}
